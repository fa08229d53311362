pub mod http_client;
pub mod http_handler;
pub mod middleware;
pub mod route_handler;

/// Re-export commonly used types from adapters
pub use http_client::HttpClientAdapter;
pub use http_handler::{AppState, router};
pub use route_handler::{HandlerSpec, load_route_table};
