//! Read-through cache in front of search and suggestions.
//!
//! Every backend failure degrades to a miss (reads) or a no-op (writes); the
//! cache is never allowed to fail a request.

pub mod memory;
pub mod redis;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::search::SearchFilters;
use crate::store::SuggestionKind;

pub const FILTERED_SEARCH_TTL: Duration = Duration::from_secs(180);
pub const UNFILTERED_SEARCH_TTL: Duration = Duration::from_secs(300);
pub const SUGGESTION_TTL: Duration = Duration::from_secs(3600);

const SEARCH_PREFIX: &str = "search:";
const SUGGEST_PREFIX: &str = "suggest:";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache operation timed out")]
    Timeout,

    #[error("cache payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    /// Remove every key starting with `prefix`; returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError>;
}

pub fn search_ttl(filters: &SearchFilters) -> Duration {
    if filters.has_optional_filters() {
        FILTERED_SEARCH_TTL
    } else {
        UNFILTERED_SEARCH_TTL
    }
}

pub fn suggestion_key(kind: SuggestionKind, text: &str) -> String {
    format!("{SUGGEST_PREFIX}{}:{}", kind.as_str(), text.trim().to_lowercase())
}

#[derive(Clone, Default)]
pub struct ReadThroughCache {
    backend: Option<Arc<dyn CacheBackend>>,
}

impl ReadThroughCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// A cache that always misses.
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let backend = self.backend.as_ref()?;
        match backend.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(key, error = %e, "Discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let Some(backend) = &self.backend else {
            return;
        };
        let result = match serde_json::to_string(value) {
            Ok(raw) => backend.set(key, &raw, ttl).await,
            Err(e) => Err(CacheError::from(e)),
        };
        if let Err(e) = result {
            tracing::warn!(key, error = %e, "Cache write failed");
        }
    }

    /// Serve `key` from the cache, or compute, store and return it.
    /// The flag is `true` when the value came from the cache.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<(T, bool), E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get_json(key).await {
            return Ok((hit, true));
        }
        let value = compute().await?;
        self.put_json(key, &value, ttl).await;
        Ok((value, false))
    }

    /// Drop all search and suggestion entries.
    pub async fn invalidate_all(&self) -> u64 {
        let Some(backend) = &self.backend else {
            return 0;
        };
        let mut removed = 0;
        for prefix in [SEARCH_PREFIX, SUGGEST_PREFIX] {
            match backend.delete_prefix(prefix).await {
                Ok(n) => removed += n,
                Err(e) => tracing::warn!(prefix, error = %e, "Cache invalidation failed"),
            }
        }
        tracing::info!(removed, "Cache invalidated");
        removed
    }
}
