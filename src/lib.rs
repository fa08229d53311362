//! apigate - a lightweight API gateway.
//!
//! apigate sits in front of a set of small HTTP endpoints and adds the plumbing
//! they share: API-key issuance and authentication, a per-caller request
//! quota, live request statistics, and a file-backed registry of endpoint
//! definitions and status-monitor targets managed through an admin API.
//!
//! # Features
//! - One API key per caller identity, issued idempotently and persisted to JSON
//! - Master and status-page keys that bypass the quota
//! - Fixed-window rate limiting per identity (100 requests / 10 minutes by default)
//! - Request statistics derived on read (success rate, latency, throughput,
//!   per-endpoint breakdown)
//! - Endpoint registry on disk (`<slug>.json` definition + `<slug>.handler`
//!   source), loaded into a route table at boot
//! - Static and reverse-proxy handlers for dynamic routes
//! - Structured tracing via `tracing`, Prometheus-style counters via `metrics`
//! - Graceful shutdown on SIGINT / SIGTERM
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use apigate::{AppState, GatewayService, HttpClient, HttpClientAdapter, load_route_table, router};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let cfg = apigate::config::load_config("config.toml").await?;
//! let gateway = GatewayService::open(Arc::new(cfg)).await?;
//! let client: Arc<dyn HttpClient> = Arc::new(HttpClientAdapter::new()?);
//! let routes = load_route_table(gateway.endpoints(), client).await;
//! let app = router(AppState::new(Arc::new(gateway.with_routes(routes))));
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! business logic inside `core`. Core services never see HTTP routing; the axum router and
//! middleware live in `adapters`.
//!
//! # Error Handling
//! Request-path failures are `core::GatewayError`, rendered as
//! `{"success": false, "message": ...}` with the matching status code. Startup and
//! configuration return `eyre::Result<T>` with context attached through `WrapErr`.
//!
//! # Concurrency & Data Structures
//! Rate-limit windows live in an `scc::HashMap` so different identities never contend.
//! Each JSON store sits behind its own async mutex and is rewritten atomically on change.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{AppState, HttpClientAdapter, load_route_table, router},
    core::{GatewayError, GatewayService},
    ports::{endpoint_handler::EndpointHandler, http_client::HttpClient},
    utils::GracefulShutdown,
};
