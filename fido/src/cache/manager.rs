//! [`CacheManager`]: typed get/set/invalidate over a [`CacheStore`].

use super::{CacheKey, CacheStore};
use crate::types::{CacheNamespace, TransactionId, UserId};
use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tracing::{debug, instrument, warn};

#[derive(Clone)]
pub struct CacheManager {
    store: Option<Arc<dyn CacheStore>>,
    default_ttl: Duration,
    /// Bumped on every invalidation, shared by all clones
    generation: Arc<AtomicU64>,
}

impl CacheManager {
    pub fn new(store: Arc<dyn CacheStore>, default_ttl: Duration) -> Self {
        Self {
            store: Some(store),
            default_ttl,
            generation: Arc::default(),
        }
    }

    /// A manager that never stores anything
    pub fn disabled() -> Self {
        Self {
            store: None,
            default_ttl: Duration::ZERO,
            generation: Arc::default(),
        }
    }

    /// `None` on a miss, and also when the store fails or the entry cannot be decoded
    #[instrument(skip(self))]
    pub async fn get_cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let store = self.store.as_ref()?;
        let raw = match store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                counter!("fido_cache_lookups_total", "result" => "miss").increment(1);
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Cache read failed");
                counter!("fido_cache_lookups_total", "result" => "error").increment(1);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                counter!("fido_cache_lookups_total", "result" => "hit").increment(1);
                Some(value)
            }
            Err(e) => {
                warn!(error = %e, "Discarding undecodable cache entry");
                counter!("fido_cache_lookups_total", "result" => "error").increment(1);
                None
            }
        }
    }

    /// Store a value; `ttl` defaults to the configured TTL. Returns `false` on any failure.
    #[instrument(skip(self, value))]
    pub async fn set_cached<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Failed to serialize cache entry");
                return false;
            }
        };
        match store.set(key, raw, ttl.unwrap_or(self.default_ttl)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Cache write failed");
                false
            }
        }
    }

    /// Remove all keys matching a glob; returns the number removed, 0 on failure
    #[instrument(skip(self))]
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> u64 {
        let Some(store) = self.store.as_ref() else {
            return 0;
        };
        self.generation.fetch_add(1, Ordering::SeqCst);
        match store.delete_matching(pattern).await {
            Ok(removed) => {
                debug!(removed, "Invalidated cache entries");
                removed
            }
            Err(e) => {
                warn!(error = %e, "Cache invalidation failed");
                0
            }
        }
    }

    /// `namespace:*`, or `namespace:*{identifier}*` when an identifier is given
    pub async fn invalidate_by_namespace(&self, namespace: CacheNamespace, identifier: Option<&str>) -> u64 {
        self.invalidate_by_pattern(&namespace_pattern(namespace, identifier)).await
    }

    /// Return the cached value for `key`, or compute, store and return it.
    ///
    /// Errors from `compute` are returned as-is and never cached. A value computed while an
    /// invalidation ran is returned but not stored.
    pub async fn cached<T, E, F, Fut>(&self, key: &CacheKey, ttl: Option<Duration>, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = key.to_string();
        if let Some(hit) = self.get_cached::<T>(&key).await {
            return Ok(hit);
        }
        let generation = self.generation.load(Ordering::SeqCst);
        let value = compute().await?;
        if self.generation.load(Ordering::SeqCst) == generation {
            self.set_cached(&key, &value, ttl).await;
        } else {
            debug!(%key, "Invalidation during compute, not caching");
        }
        Ok(value)
    }

    /// Drop every cached view derived from a user's ledger: transaction listings, the
    /// transaction itself, analytics and the user record (whose balance may have moved)
    pub async fn invalidate_ledger(&self, user_id: UserId, transaction_id: Option<TransactionId>) -> u64 {
        let mut patterns = vec![
            "transaction:list*".to_string(),
            format!("transaction:user:{user_id}"),
            format!("transaction:user:{user_id}:*"),
            format!("analytics:user:{user_id}"),
            format!("analytics:user:{user_id}:*"),
        ];
        if let Some(id) = transaction_id {
            patterns.push(format!("transaction:single:{id}"));
        }
        patterns.extend(user_patterns(user_id));

        let mut removed = 0;
        for pattern in patterns {
            removed += self.invalidate_by_pattern(&pattern).await;
        }
        removed
    }

    /// Drop a user's cached record and balance plus every user listing
    pub async fn invalidate_user(&self, user_id: UserId) -> u64 {
        let mut removed = 0;
        for pattern in user_patterns(user_id) {
            removed += self.invalidate_by_pattern(&pattern).await;
        }
        removed
    }
}

fn user_patterns(user_id: UserId) -> [String; 3] {
    [
        format!("user:single:{user_id}"),
        format!("user:balance:{user_id}"),
        "user:list*".to_string(),
    ]
}

pub fn namespace_pattern(namespace: CacheNamespace, identifier: Option<&str>) -> String {
    match identifier {
        Some(id) if !id.is_empty() => format!("{}:*{id}*", namespace.as_str()),
        _ => format!("{}:*", namespace.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager() -> CacheManager {
        CacheManager::new(Arc::new(MemoryStore::new(100)), Duration::from_secs(60))
    }

    #[test]
    fn namespace_patterns() {
        assert_eq!(namespace_pattern(CacheNamespace::Transaction, None), "transaction:*");
        assert_eq!(namespace_pattern(CacheNamespace::User, Some("42")), "user:*42*");
        assert_eq!(namespace_pattern(CacheNamespace::User, Some("")), "user:*");
    }

    #[tokio::test]
    async fn get_and_set_round_trip() {
        let cache = manager();
        assert_eq!(cache.get_cached::<Vec<i64>>("system:k").await, None);
        assert!(cache.set_cached("system:k", &vec![1, 2, 3], None).await);
        assert_eq!(cache.get_cached::<Vec<i64>>("system:k").await, Some(vec![1, 2, 3]));
        // wrong shape decodes as a miss
        assert_eq!(cache.get_cached::<String>("system:k").await, None);
    }

    #[tokio::test]
    async fn cached_computes_once() {
        let cache = manager();
        let key = CacheKey::new(CacheNamespace::Analytics).prefix("user").identifier(7);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Result<String, String> = cache
                .cached(&key, None, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("computed".to_string())
                })
                .await;
            assert_eq!(value.unwrap(), "computed");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache = manager();
        let key = CacheKey::new(CacheNamespace::Transaction).prefix("single").identifier(1);

        let first: Result<i64, &str> = cache.cached(&key, None, || async { Err("boom") }).await;
        assert!(first.is_err());
        let second: Result<i64, &str> = cache.cached(&key, None, || async { Ok(5) }).await;
        assert_eq!(second.unwrap(), 5);
    }

    #[tokio::test]
    async fn value_read_before_invalidation_is_not_stored() {
        let cache = manager();
        let key = CacheKey::new(CacheNamespace::Transaction).prefix("single").identifier(3);

        // The write commits and invalidates while this read is still computing
        let value: Result<String, String> = cache
            .cached(&key, None, || async {
                cache.invalidate_ledger(1, Some(3)).await;
                Ok("pending".to_string())
            })
            .await;
        assert_eq!(value.unwrap(), "pending");
        assert_eq!(cache.get_cached::<String>("transaction:single:3").await, None);

        let fresh: Result<String, String> = cache.cached(&key, None, || async { Ok("success".to_string()) }).await;
        assert_eq!(fresh.unwrap(), "success");
        assert_eq!(cache.get_cached::<String>("transaction:single:3").await.as_deref(), Some("success"));
    }

    #[tokio::test]
    async fn invalidates_namespace_for_identifier() {
        let cache = manager();
        cache.set_cached("user:single:42", &1, None).await;
        cache.set_cached("user:balance:42", &2, None).await;
        cache.set_cached("user:single:7", &3, None).await;

        assert_eq!(cache.invalidate_by_namespace(CacheNamespace::User, Some("42")).await, 2);
        assert_eq!(cache.get_cached::<i64>("user:single:7").await, Some(3));
        assert_eq!(cache.invalidate_by_namespace(CacheNamespace::User, None).await, 1);
    }

    #[tokio::test]
    async fn ledger_invalidation_is_scoped_to_the_user() {
        let cache = manager();
        for key in [
            "transaction:list:limit_20:skip_0",
            "transaction:single:9",
            "transaction:user:1:limit_100:skip_0",
            "transaction:user:12:limit_100:skip_0",
            "analytics:user:1",
            "user:single:1",
            "user:balance:1",
            "user:list:limit_10:skip_0",
        ] {
            cache.set_cached(key, &0, None).await;
        }

        assert_eq!(cache.invalidate_ledger(1, Some(9)).await, 7);
        assert_eq!(cache.get_cached::<i64>("transaction:user:12:limit_100:skip_0").await, Some(0));
    }

    #[tokio::test]
    async fn disabled_cache_always_misses() {
        let cache = CacheManager::disabled();
        assert!(!cache.set_cached("system:k", &1, None).await);
        assert_eq!(cache.get_cached::<i64>("system:k").await, None);
        assert_eq!(cache.invalidate_by_pattern("*").await, 0);
    }
}
