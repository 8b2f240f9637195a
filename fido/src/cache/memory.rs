//! In-process cache store backed by moka.

use super::{CacheStore, glob_match};
use async_trait::async_trait;
use moka::{Expiry, future::Cache};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    ttl: Duration,
}

/// Each entry expires after the TTL it was written with
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, entry: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(&self, _key: &String, entry: &Entry, _updated_at: Instant, _remaining: Option<Duration>) -> Option<Duration> {
        Some(entry.ttl)
    }
}

#[derive(Clone)]
pub struct MemoryStore {
    cache: Cache<String, Entry>,
}

impl MemoryStore {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder().max_capacity(max_capacity).expire_after(PerEntryTtl).build();
        Self { cache }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.cache.get(key).await.map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()> {
        self.cache.insert(key.to_string(), Entry { value, ttl }).await;
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> anyhow::Result<u64> {
        let matching: Vec<String> = self
            .cache
            .iter()
            .filter(|(key, _)| glob_match(pattern, key))
            .map(|(key, _)| key.as_ref().clone())
            .collect();

        let mut removed = 0;
        for key in matching {
            if self.cache.remove(&key).await.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_and_expires_entries() {
        let store = MemoryStore::new(100);
        store.set("user:single:1", "{}".into(), Duration::from_millis(50)).await.unwrap();
        assert_eq!(store.get("user:single:1").await.unwrap().as_deref(), Some("{}"));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(store.get("user:single:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn deletes_by_pattern() {
        let store = MemoryStore::new(100);
        let ttl = Duration::from_secs(60);
        store.set("transaction:single:1", "a".into(), ttl).await.unwrap();
        store.set("transaction:list:limit_20:skip_0", "b".into(), ttl).await.unwrap();
        store.set("analytics:user:1", "c".into(), ttl).await.unwrap();

        assert_eq!(store.delete_matching("transaction:*").await.unwrap(), 2);
        assert_eq!(store.get("transaction:single:1").await.unwrap(), None);
        assert_eq!(store.get("analytics:user:1").await.unwrap().as_deref(), Some("c"));
        assert_eq!(store.delete_matching("nothing:*").await.unwrap(), 0);
    }
}
