//! Response caching for read endpoints.
//!
//! Cached values are JSON strings stored under keys of the form
//! `namespace[:prefix][:identifier][:params]` (see [`keys`]). The backing store is chosen by
//! [`crate::config::CacheBackend`]:
//!
//! - [`redis_store::RedisStore`]: shared Redis, `SET EX` for expiry and `SCAN` for invalidation
//! - [`memory::MemoryStore`]: in-process moka cache, for development and tests
//! - disabled: [`CacheManager::disabled`], every lookup misses
//!
//! Store failures never fail a request. [`CacheManager`] logs them and falls back to the
//! database.

pub mod keys;
pub mod manager;
pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use std::time::Duration;

pub use keys::CacheKey;
pub use manager::CacheManager;

/// Key/value store holding serialized cache entries.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()>;

    /// Remove every key matching a Redis-style glob, returning how many were removed
    async fn delete_matching(&self, pattern: &str) -> anyhow::Result<u64>;
}

/// Redis glob matching (`*`, `?`, `[...]`, `\` escapes), used by stores without native SCAN
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();
    glob_match_from(&pattern, &key)
}

fn glob_match_from(pattern: &[char], key: &[char]) -> bool {
    match pattern.first() {
        None => key.is_empty(),
        Some('*') => {
            let rest = &pattern[1..];
            (0..=key.len()).any(|i| glob_match_from(rest, &key[i..]))
        }
        Some('?') => !key.is_empty() && glob_match_from(&pattern[1..], &key[1..]),
        Some('[') => {
            let Some(close) = pattern.iter().position(|&c| c == ']') else {
                return key.first() == Some(&'[') && glob_match_from(&pattern[1..], &key[1..]);
            };
            let Some(&ch) = key.first() else {
                return false;
            };
            let class = &pattern[1..close];
            let (negated, class) = match class.first() {
                Some('^') => (true, &class[1..]),
                _ => (false, class),
            };
            let mut matched = false;
            let mut i = 0;
            while i < class.len() {
                if i + 2 < class.len() && class[i + 1] == '-' {
                    if class[i] <= ch && ch <= class[i + 2] {
                        matched = true;
                    }
                    i += 3;
                } else {
                    if class[i] == ch {
                        matched = true;
                    }
                    i += 1;
                }
            }
            matched != negated && glob_match_from(&pattern[close + 1..], &key[1..])
        }
        Some('\\') if pattern.len() > 1 => key.first() == Some(&pattern[1]) && glob_match_from(&pattern[2..], &key[1..]),
        Some(&c) => key.first() == Some(&c) && glob_match_from(&pattern[1..], &key[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::glob_match;

    #[test]
    fn star_matches_any_run() {
        assert!(glob_match("transaction:*", "transaction:single:1"));
        assert!(glob_match("transaction:*", "transaction:"));
        assert!(!glob_match("transaction:*", "analytics:user:1"));
        assert!(glob_match("user:*42*", "user:single:42"));
        assert!(glob_match("user:*42*", "user:single:142"));
    }

    #[test]
    fn question_mark_and_classes() {
        assert!(glob_match("user:?", "user:7"));
        assert!(!glob_match("user:?", "user:77"));
        assert!(glob_match("user:[0-9]", "user:5"));
        assert!(!glob_match("user:[^0-9]", "user:5"));
        assert!(glob_match("h[ae]llo", "hallo"));
    }

    #[test]
    fn escapes_are_literal() {
        assert!(glob_match(r"a\*b", "a*b"));
        assert!(!glob_match(r"a\*b", "axb"));
    }
}
