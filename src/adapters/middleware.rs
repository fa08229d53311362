//! Axum middleware making up the request pipeline.
//!
//! Outermost first: request id, CORS, body limit, identity, metrics timing.
//! Route groups then add authentication, the master-key gate and rate
//! limiting as route layers, so only matched routes pay for them.
use std::{net::SocketAddr, time::Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::Instrument;

use crate::{
    adapters::http_handler::AppState,
    core::{
        error::GatewayError,
        key_store::AuthenticatedCaller,
        metrics_collector::{endpoint_name, is_namespaced},
        rate_limiter::RateLimitDecision,
    },
    tracing_setup::create_request_span,
    utils::client_ip::{ClientIdentity, resolve_client_ip},
};

const UNKNOWN_CLIENT: &str = "unknown";

/// Credential from `Authorization: <scheme> <key>`; the scheme is not checked.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .split(' ')
        .nth(1)
        .filter(|token| !token.is_empty())
}

/// Resolve the caller identity and store it as a [`ClientIdentity`] extension.
pub async fn identify_client(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let hops = state.gateway.config().http.trusted_proxy_hops;

    let identity = resolve_client_ip(req.headers(), peer, hops).unwrap_or_else(|| {
        tracing::warn!("Could not determine client address");
        UNKNOWN_CLIENT.to_string()
    });
    req.extensions_mut().insert(ClientIdentity(identity));
    next.run(req).await
}

/// Time every `/api/` request and feed the collector once the response is
/// ready, whatever stage produced it.
pub async fn record_metrics(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if !is_namespaced(&path) {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let endpoint = endpoint_name(&path).map(str::to_string);
    let timer = crate::metrics::RequestTimer::new(endpoint.as_deref().unwrap_or(""), &method);
    let start = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    state
        .gateway
        .metrics()
        .record(endpoint.as_deref(), status, start.elapsed());
    crate::metrics::increment_request_total(endpoint.as_deref().unwrap_or(""), &method, status);
    drop(timer);

    response
}

/// Authenticate with an issued or privileged API key and store the
/// [`AuthenticatedCaller`] extension.
pub async fn authenticate(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let presented = bearer_token(req.headers()).map(str::to_string);

    match state.gateway.key_store().authenticate(presented.as_deref()).await {
        Ok(caller) => {
            req.extensions_mut().insert(caller);
            next.run(req).await
        }
        Err(e) => {
            let reason = match &e {
                GatewayError::Unauthenticated(_) => "missing",
                _ => "invalid",
            };
            tracing::debug!(path = %req.uri().path(), reason, "Authentication failed");
            crate::metrics::increment_auth_failure(reason);
            e.into_response()
        }
    }
}

/// Only the master key may pass.
pub async fn require_master_key(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let token = bearer_token(req.headers()).map(str::to_string);
    let (error, reason) = match token.as_deref() {
        Some(token) if state.gateway.key_store().is_master(token) => return next.run(req).await,
        Some(_) => (
            GatewayError::Forbidden("Forbidden: Invalid master API key.".to_string()),
            "invalid",
        ),
        None => (
            GatewayError::Unauthenticated("Authentication failed: API Key is missing.".to_string()),
            "missing",
        ),
    };
    tracing::warn!(path = %req.uri().path(), reason, "Rejected admin request");
    crate::metrics::increment_auth_failure(reason);
    error.into_response()
}

/// Apply the per-identity quota. Runs after [`authenticate`]; privileged
/// callers are exempt.
pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let identity = req
        .extensions()
        .get::<ClientIdentity>()
        .map(|c| c.0.clone())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());
    let privileged = req
        .extensions()
        .get::<AuthenticatedCaller>()
        .is_some_and(|caller| caller.privileged);

    let limiter = state.gateway.rate_limiter();
    let decision = limiter.check(&identity, privileged).await;
    match decision {
        RateLimitDecision::Limited { retry_after, .. } => {
            tracing::debug!(identity, ?retry_after, "Rate limit exceeded");
            crate::metrics::increment_rate_limited();
            limiter.rejection(retry_after)
        }
        RateLimitDecision::Exempt => next.run(req).await,
        RateLimitDecision::Allowed { .. } => {
            let mut response = next.run(req).await;
            limiter.annotate(&decision, &mut response);
            response
        }
    }
}

/// Permissive CORS: reflect the caller origin (or `*`) and answer preflight
/// requests directly with 204.
pub async fn cors(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if !state.gateway.config().http.cors_enabled {
        return next.run(req).await;
    }

    let origin = req
        .headers()
        .get(header::ORIGIN)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("*"));
    let is_preflight = req.method() == Method::OPTIONS
        && req
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);
    let requested_headers = req
        .headers()
        .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned();

    let mut response = if is_preflight {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    if is_preflight {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET,HEAD,PUT,PATCH,POST,DELETE"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            requested_headers
                .unwrap_or_else(|| HeaderValue::from_static("Content-Type, Authorization")),
        );
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    }
    response
}

/// Generate a per‑request UUID and expose it via tracing plus `X-Request-ID`.
pub async fn request_id(req: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = create_request_span(req.method().as_str(), req.uri().path(), &request_id);
    let start = Instant::now();

    let mut response = next.run(req).instrument(span.clone()).await;

    span.record("http.status_code", response.status().as_u16());
    span.record("duration_ms", start.elapsed().as_millis() as u64);
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", header_value);
    }
    response
}
