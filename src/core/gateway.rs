//! Central gateway service.
//!
//! `GatewayService` owns every domain service a request may touch (key store,
//! rate limiter, metrics collector and both registries) together with the
//! dynamic route table built at boot. Adapters hold it behind an `Arc`.
//!
//! The route table is immutable for the life of the process; registry
//! mutations only take effect after a restart.
use std::{collections::HashMap, sync::Arc};

use eyre::{Result, WrapErr, eyre};

use crate::{
    config::ServerConfig,
    core::{
        endpoint_registry::EndpointRegistry,
        key_store::{KeyGenerator, KeyStore, PrivilegedKeys},
        metrics_collector::MetricsCollector,
        monitor_registry::MonitorRegistry,
        rate_limiter::RateLimiter,
    },
    ports::endpoint_handler::EndpointHandler,
};

/// Dynamic routes keyed by slug.
pub type RouteTable = HashMap<String, Arc<dyn EndpointHandler>>;

pub struct GatewayService {
    config: Arc<ServerConfig>,
    key_store: KeyStore,
    rate_limiter: RateLimiter,
    metrics: MetricsCollector,
    endpoints: EndpointRegistry,
    monitors: MonitorRegistry,
    routes: RouteTable,
}

impl GatewayService {
    /// Open every store named in `config`. The route table starts empty; see
    /// [`GatewayService::with_routes`].
    pub async fn open(config: Arc<ServerConfig>) -> Result<Self> {
        let master = config
            .master_api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| eyre!("master_api_key must be configured"))?;
        let privileged = PrivilegedKeys::new(master, config.status_page_api_key.clone());

        let key_store = KeyStore::load(
            config.storage.api_keys_file.clone(),
            KeyGenerator::from_config(&config.api_keys),
            privileged,
        )
        .await;

        let rate_limiter = RateLimiter::new(&config.rate_limit)
            .map_err(|e| eyre!(e))
            .wrap_err("Invalid rate_limit section")?;

        let endpoints = EndpointRegistry::open(config.storage.routes_dir.clone())
            .await
            .wrap_err_with(|| {
                format!(
                    "Failed to open routes directory {}",
                    config.storage.routes_dir.display()
                )
            })?;

        let monitors = MonitorRegistry::load(config.storage.monitored_endpoints_file.clone()).await;
        let metrics = MetricsCollector::new(&config.metrics);

        Ok(Self {
            config,
            key_store,
            rate_limiter,
            metrics,
            endpoints,
            monitors,
            routes: HashMap::new(),
        })
    }

    /// Install the boot-time route table.
    pub fn with_routes(mut self, routes: RouteTable) -> Self {
        tracing::info!(count = routes.len(), "Installed dynamic route table");
        self.routes = routes;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn key_store(&self) -> &KeyStore {
        &self.key_store
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn endpoints(&self) -> &EndpointRegistry {
        &self.endpoints
    }

    pub fn monitors(&self) -> &MonitorRegistry {
        &self.monitors
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Handler registered for `slug`, if it loaded at boot.
    pub fn route(&self, slug: &str) -> Option<Arc<dyn EndpointHandler>> {
        self.routes.get(slug).cloned()
    }

    /// Slugs with a live handler, sorted.
    pub fn route_slugs(&self) -> Vec<String> {
        let mut slugs: Vec<String> = self.routes.keys().cloned().collect();
        slugs.sort();
        slugs
    }
}
