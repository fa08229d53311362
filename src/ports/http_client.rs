use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Errors raised while forwarding a request upstream.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Connecting to or talking with the upstream failed
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Timeout error after {0:?}")]
    Timeout(Duration),

    /// The outgoing request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// Outbound HTTP used by proxy handlers.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send `req` upstream, giving up after `timeout`.
    async fn send_request(
        &self,
        req: Request<AxumBody>,
        timeout: Duration,
    ) -> HttpClientResult<Response<AxumBody>>;
}
