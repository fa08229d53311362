//! Error taxonomy shared by the domain services.
//!
//! Every variant maps onto one HTTP status and renders the
//! `{"success": false, "message": ...}` envelope. Storage failures keep the
//! underlying cause for logs but only the context string reaches the caller.
use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    /// No credential was presented.
    #[error("{0}")]
    Unauthenticated(String),

    /// A credential was presented but does not grant access.
    #[error("{0}")]
    Forbidden(String),

    /// Missing field, malformed JSON payload or unusable slug.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// Duplicate slug or monitor name.
    #[error("{0}")]
    Conflict(String),

    /// Reading or writing a store file failed.
    #[error("{context}: {source}")]
    Persistence {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Result alias for domain operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn persistence(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Persistence {
            context: context.into(),
            source,
        }
    }

    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Persistence { .. } | Self::Serialization { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to return to the caller.
    pub fn public_message(&self) -> String {
        match self {
            Self::Persistence { context, .. } | Self::Serialization { context, .. } => {
                context.clone()
            }
            other => other.to_string(),
        }
    }
}

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed with an internal error");
        }
        let body = json!({ "success": false, "message": self.public_message() });
        (status, Json(body)).into_response()
    }
}
