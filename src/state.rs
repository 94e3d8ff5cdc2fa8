use std::sync::Arc;

use crate::cache::ReadThroughCache;
use crate::geocode::GeocodeResolver;
use crate::rate_limit::RateLimiter;
use crate::store::JobStore;
use crate::upsert::UpsertEngine;

/// Shared handles for every route.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub resolver: Arc<GeocodeResolver>,
    pub engine: Arc<UpsertEngine>,
    pub cache: ReadThroughCache,
    pub submissions: Arc<RateLimiter>,
    /// Key submission throttling on `X-Forwarded-For` instead of the peer.
    pub trust_forwarded_for: bool,
}

impl AppState {
    pub fn new(
        store: Arc<dyn JobStore>,
        resolver: Arc<GeocodeResolver>,
        cache: ReadThroughCache,
        submissions: Arc<RateLimiter>,
    ) -> Self {
        let engine = Arc::new(UpsertEngine::new(store.clone()));
        Self {
            store,
            resolver,
            engine,
            cache,
            submissions,
            trust_forwarded_for: false,
        }
    }

    /// Only enable behind a reverse proxy that overwrites `X-Forwarded-For`.
    pub fn trusting_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }
}
