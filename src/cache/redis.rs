use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio::time::timeout;

use super::{CacheBackend, CacheError};

const OP_TIMEOUT: Duration = Duration::from_millis(250);
const SCAN_BATCH: usize = 500;

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::Backend(e.to_string())
    }
}

/// Shared Redis cache. Keys are namespaced as `{prefix}:{key}`.
#[derive(Clone)]
pub struct RedisCache {
    client: redis::Client,
    prefix: String,
    op_timeout: Duration,
}

impl RedisCache {
    pub fn new(url: &str, prefix: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            prefix: prefix.trim_end_matches(':').to_string(),
            op_timeout: OP_TIMEOUT,
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CacheError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        F: std::future::Future<Output = Result<T, CacheError>>,
    {
        timeout(self.op_timeout, op)
            .await
            .map_err(|_| CacheError::Timeout)?
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let key = self.namespaced(key);
        self.bounded(async {
            let mut conn = self.connection().await?;
            let value: Option<String> = conn.get(&key).await?;
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let key = self.namespaced(key);
        let ttl = ttl.as_secs().max(1);
        self.bounded(async {
            let mut conn = self.connection().await?;
            let _: () = conn.set_ex(&key, value, ttl).await?;
            Ok(())
        })
        .await
    }

    /// SCAN + DEL in batches; never `KEYS`, which blocks the server.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let pattern = format!("{}*", self.namespaced(prefix));
        let mut conn = self.bounded(self.connection()).await?;
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = self
                .bounded(async {
                    Ok(redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await?)
                })
                .await?;
            if !keys.is_empty() {
                let deleted: u64 = self.bounded(async { Ok(conn.del(&keys).await?) }).await?;
                removed += deleted;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    // Non-routable address: connects hang until the OS gives up.
    const BLACKHOLE: &str = "redis://10.255.255.1:6379";

    #[test]
    fn keys_are_namespaced() {
        let cache = RedisCache::new("redis://127.0.0.1:6379", "jobmap:").unwrap();
        assert_eq!(cache.namespaced("search:bbox=1"), "jobmap:search:bbox=1");
    }

    #[test]
    fn rejects_malformed_url() {
        assert!(RedisCache::new("not a url", "jobmap").is_err());
    }

    #[tokio::test]
    async fn unreachable_server_fails_within_the_op_timeout() {
        let cache = RedisCache::new(BLACKHOLE, "jobmap").unwrap();
        let started = Instant::now();
        assert!(cache.delete_prefix("search:").await.is_err());
        assert!(cache.get("search:bbox=1").await.is_err());
        assert!(cache.set("search:bbox=1", "{}", Duration::from_secs(60)).await.is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
