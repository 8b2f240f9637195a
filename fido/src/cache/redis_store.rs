//! Redis-backed cache store.

use super::CacheStore;
use anyhow::Context;
use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use std::time::Duration;

/// Keys deleted per `DEL` while invalidating
const DELETE_BATCH: usize = 500;

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.context("redis GET")?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await.context("redis SET EX")?;
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> anyhow::Result<u64> {
        let keys: Vec<String> = {
            let mut conn = self.conn.clone();
            let mut iter = conn.scan_match::<_, String>(pattern).await.context("redis SCAN")?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut conn = self.conn.clone();
        let mut removed = 0;
        for chunk in keys.chunks(DELETE_BATCH) {
            let count: u64 = conn.del(chunk).await.context("redis DEL")?;
            removed += count;
        }
        Ok(removed)
    }
}
