use async_trait::async_trait;
use axum::{
    Json,
    body::Body as AxumBody,
    response::{IntoResponse, Response as AxumResponse},
};
use hyper::{Request, Response, StatusCode};
use serde_json::json;
use thiserror::Error;

/// Error type for dynamic endpoint handlers
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HandlerError {
    /// The handler source could not be turned into a handler
    #[error("Invalid handler source: {0}")]
    InvalidSource(String),
    #[error("Bad gateway: {0}")]
    BadGateway(String),
    #[error("Gateway timeout: {0}")]
    GatewayTimeout(String),
    #[error("Internal server error: {0}")]
    InternalError(String),
}

pub type HandlerResult<T> = Result<T, HandlerError>;

impl HandlerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HandlerError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            HandlerError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            HandlerError::InvalidSource(_) | HandlerError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> AxumResponse {
        let status = self.status_code();
        tracing::error!(error = %self, status = status.as_u16(), "Endpoint handler failed");
        let message = status.canonical_reason().unwrap_or("Handler error");
        (status, Json(json!({ "success": false, "message": message }))).into_response()
    }
}

/// Capability invoked for a request admitted to `/api/<slug>`.
#[async_trait]
pub trait EndpointHandler: Send + Sync + 'static {
    /// Short label for logs.
    fn kind(&self) -> &'static str;

    async fn handle(&self, req: Request<AxumBody>) -> HandlerResult<Response<AxumBody>>;
}
