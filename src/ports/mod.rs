pub mod endpoint_handler;
pub mod http_client;

pub use endpoint_handler::{EndpointHandler, HandlerError, HandlerResult};
pub use http_client::{HttpClient, HttpClientError, HttpClientResult};
