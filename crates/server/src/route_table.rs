//! Resolves a model id to its route table (§4.9), caching one [`Endpoint`]
//! set per model so each endpoint's circuit-breaker state accumulates
//! across requests instead of resetting on every call.
//!
//! Routing is driven entirely by [`AdapterRegistry`]'s prefix/pattern rules
//! against the raw model id. `RouteTable::endpoints_for` is synchronous by
//! the gateway crate's own contract (§4.9's fixed step order), so this does
//! not round-trip to the record store — by the time the pipeline calls it,
//! Model Resolution has already confirmed the model exists and is usable.

use std::sync::Arc;

use dashmap::DashMap;
use warden_gateway::Endpoint;
use warden_provider::{AdapterRegistry, ProviderError};

pub struct CachedRouteTable {
    registry: Arc<AdapterRegistry>,
    cache: DashMap<String, Arc<Vec<Endpoint>>>,
}

impl CachedRouteTable {
    #[must_use]
    pub fn new(registry: Arc<AdapterRegistry>) -> Self {
        Self {
            registry,
            cache: DashMap::new(),
        }
    }
}

impl warden_gateway::RouteTable for CachedRouteTable {
    fn endpoints_for(&self, model_id: &str) -> Result<Arc<Vec<Endpoint>>, ProviderError> {
        if let Some(existing) = self.cache.get(model_id) {
            return Ok(existing.clone());
        }

        let (adapter, _upstream_model_id) = self.registry.resolve(model_id)?;
        let endpoint = Endpoint::new(model_id.to_owned(), adapter);
        let endpoints = Arc::new(vec![endpoint]);
        self.cache.insert(model_id.to_owned(), endpoints.clone());
        Ok(endpoints)
    }
}
