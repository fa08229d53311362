pub mod endpoint_registry;
pub mod error;
pub mod gateway;
pub mod key_store;
pub mod metrics_collector;
pub mod monitor_registry;
pub mod rate_limiter;

pub use endpoint_registry::EndpointRegistry;
pub use error::{GatewayError, GatewayResult};
pub use gateway::{GatewayService, RouteTable};
pub use key_store::KeyStore;
pub use metrics_collector::MetricsCollector;
pub use monitor_registry::MonitorRegistry;
pub use rate_limiter::RateLimiter;
