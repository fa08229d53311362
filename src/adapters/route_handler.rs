//! Handler sources and the boot-time route table.
//!
//! A `<slug>.handler` file is a JSON document tagged by `type`:
//!
//! ```json
//! { "type": "static", "status": 200, "headers": {"x-env": "prod"}, "body": {"ok": true} }
//! { "type": "proxy", "target": "https://upstream.example/v1", "timeout_secs": 10 }
//! ```
//!
//! Sources are parsed once at startup. A source that fails to parse or
//! validate is logged and its route is left out; every other route still
//! loads.
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    body::Body as AxumBody,
    extract::ConnectInfo,
    http::{HeaderName, HeaderValue, StatusCode, Uri, header},
};
use hyper::{Request, Response};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::{
    core::endpoint_registry::{EndpointRegistry, is_reserved, normalize_slug},
    ports::{
        endpoint_handler::{EndpointHandler, HandlerError, HandlerResult},
        http_client::{HttpClient, HttpClientError},
    },
    utils::client_ip::ClientIdentity,
};

fn default_status() -> u16 {
    200
}

fn default_timeout_secs() -> u64 {
    30
}

/// Parsed form of a handler source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerSpec {
    Static {
        #[serde(default = "default_status")]
        status: u16,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        body: Value,
    },
    Proxy {
        target: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

impl HandlerSpec {
    /// Parse and validate a handler source.
    pub fn parse(source: &str) -> HandlerResult<Self> {
        let spec: HandlerSpec = serde_json::from_str(source)
            .map_err(|e| HandlerError::InvalidSource(format!("not a handler document: {e}")))?;
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> HandlerResult<()> {
        match self {
            HandlerSpec::Static {
                status, headers, ..
            } => {
                StatusCode::from_u16(*status).map_err(|_| {
                    HandlerError::InvalidSource(format!("invalid status code {status}"))
                })?;
                for (name, value) in headers {
                    HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                        HandlerError::InvalidSource(format!("invalid header name '{name}'"))
                    })?;
                    HeaderValue::from_str(value).map_err(|_| {
                        HandlerError::InvalidSource(format!("invalid value for header '{name}'"))
                    })?;
                }
                Ok(())
            }
            HandlerSpec::Proxy {
                target,
                timeout_secs,
            } => {
                let url = Url::parse(target).map_err(|e| {
                    HandlerError::InvalidSource(format!("invalid proxy target '{target}': {e}"))
                })?;
                if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
                    return Err(HandlerError::InvalidSource(format!(
                        "proxy target '{target}' must be an absolute http(s) URL"
                    )));
                }
                if *timeout_secs == 0 {
                    return Err(HandlerError::InvalidSource(
                        "timeout_secs must be greater than 0".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Build the handler for `slug`.
    pub fn into_handler(
        self,
        slug: &str,
        http_client: Arc<dyn HttpClient>,
    ) -> Arc<dyn EndpointHandler> {
        match self {
            HandlerSpec::Static {
                status,
                headers,
                body,
            } => Arc::new(StaticResponseHandler {
                status,
                headers,
                body,
            }),
            HandlerSpec::Proxy {
                target,
                timeout_secs,
            } => Arc::new(ProxyHandler {
                slug: slug.to_string(),
                target: target.trim_end_matches('/').to_string(),
                timeout: Duration::from_secs(timeout_secs),
                http_client,
            }),
        }
    }
}

/// Answers every request with a fixed response.
#[derive(Debug, Clone)]
pub struct StaticResponseHandler {
    status: u16,
    headers: HashMap<String, String>,
    body: Value,
}

#[async_trait]
impl EndpointHandler for StaticResponseHandler {
    fn kind(&self) -> &'static str {
        "static"
    }

    async fn handle(&self, _req: Request<AxumBody>) -> HandlerResult<Response<AxumBody>> {
        let (content_type, body) = match &self.body {
            Value::String(text) => ("text/plain; charset=utf-8", text.clone().into_bytes()),
            other => (
                "application/json",
                serde_json::to_vec(other).map_err(|e| HandlerError::InternalError(e.to_string()))?,
            ),
        };

        let mut response = Response::builder()
            .status(self.status)
            .header(header::CONTENT_TYPE, content_type)
            .body(AxumBody::from(body))
            .map_err(|e| HandlerError::InternalError(e.to_string()))?;
        // Configured headers replace the defaults rather than repeating them.
        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| HandlerError::InternalError(e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| HandlerError::InternalError(e.to_string()))?;
            headers.insert(name, value);
        }
        Ok(response)
    }
}

/// Forwards requests to an upstream base URL.
pub struct ProxyHandler {
    slug: String,
    target: String,
    timeout: Duration,
    http_client: Arc<dyn HttpClient>,
}

impl ProxyHandler {
    /// Upstream URI: target + path remainder after `/api/<slug>` + query.
    fn upstream_uri(&self, original: &Uri) -> HandlerResult<Uri> {
        let prefix = format!("/api/{}", self.slug);
        let remainder = original.path().strip_prefix(&prefix).unwrap_or("");
        let query = original
            .query()
            .map(|q| format!("?{q}"))
            .unwrap_or_default();
        format!("{}{remainder}{query}", self.target)
            .parse()
            .map_err(|e| HandlerError::InternalError(format!("failed to build upstream URI: {e}")))
    }
}

#[async_trait]
impl EndpointHandler for ProxyHandler {
    fn kind(&self) -> &'static str {
        "proxy"
    }

    async fn handle(&self, mut req: Request<AxumBody>) -> HandlerResult<Response<AxumBody>> {
        let original_uri = req.uri().clone();
        let original_host = req.headers().get(header::HOST).cloned();
        // The hop we append is whoever connected to us; without socket info,
        // the resolved caller.
        let hop = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .or_else(|| {
                req.extensions()
                    .get::<ClientIdentity>()
                    .map(|c| c.as_str().to_string())
            });

        *req.uri_mut() = self.upstream_uri(&original_uri)?;

        let headers = req.headers_mut();
        // The gateway credential is not meant for the upstream.
        headers.remove(header::AUTHORIZATION);
        headers.remove(header::HOST);
        if let Some(host) = original_host {
            headers.insert("x-forwarded-host", host);
        }
        headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
        if let Some(hop) = hop {
            let chain = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
                Some(existing) if !existing.trim().is_empty() => format!("{existing}, {hop}"),
                _ => hop,
            };
            if let Ok(value) = HeaderValue::from_str(&chain) {
                headers.insert("x-forwarded-for", value);
            }
        }

        match self.http_client.send_request(req, self.timeout).await {
            Ok(response) => Ok(response),
            Err(HttpClientError::Timeout(after)) => Err(HandlerError::GatewayTimeout(format!(
                "{} did not answer within {after:?}",
                self.target
            ))),
            Err(e) => Err(HandlerError::BadGateway(e.to_string())),
        }
    }
}

/// Build the route table from the registry's handler sources. Sources that
/// fail to load are logged and skipped.
pub async fn load_route_table(
    registry: &EndpointRegistry,
    http_client: Arc<dyn HttpClient>,
) -> HashMap<String, Arc<dyn EndpointHandler>> {
    let sources = match registry.handler_sources().await {
        Ok(sources) => sources,
        Err(e) => {
            tracing::error!(
                dir = %registry.routes_dir().display(),
                error = %e,
                "Could not read routes directory, serving no dynamic routes"
            );
            return HashMap::new();
        }
    };

    let mut routes = HashMap::new();
    for source in sources {
        let route_path = format!("/api/{}", source.slug);

        if normalize_slug(&source.slug).as_deref() != Some(source.slug.as_str()) {
            tracing::error!(file = %source.path.display(), "Skipping route with a non-normalized name");
            continue;
        }
        if is_reserved(&source.slug) {
            tracing::error!(route = %route_path, "Skipping route that shadows a built-in route");
            continue;
        }

        match HandlerSpec::parse(&source.source) {
            Ok(spec) => {
                let handler = spec.into_handler(&source.slug, http_client.clone());
                tracing::info!(route = %route_path, kind = handler.kind(), "Loaded route");
                routes.insert(source.slug, handler);
            }
            Err(e) => {
                tracing::error!(route = %route_path, error = %e, "Failed to load route");
            }
        }
    }
    routes
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use http_body_util::BodyExt;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        core::endpoint_registry::{NewEndpoint, STUB_HANDLER},
        ports::http_client::HttpClientResult,
    };

    /// Records the forwarded request and answers 200.
    #[derive(Default)]
    struct RecordingClient {
        seen: Mutex<Option<(Uri, axum::http::HeaderMap)>>,
        fail_with_timeout: bool,
    }

    #[async_trait]
    impl HttpClient for RecordingClient {
        async fn send_request(
            &self,
            req: Request<AxumBody>,
            timeout: Duration,
        ) -> HttpClientResult<Response<AxumBody>> {
            if self.fail_with_timeout {
                return Err(HttpClientError::Timeout(timeout));
            }
            *self.seen.lock().unwrap() = Some((req.uri().clone(), req.headers().clone()));
            Ok(Response::new(AxumBody::from("upstream")))
        }
    }

    #[test]
    fn test_parse_stub() {
        let spec = HandlerSpec::parse(STUB_HANDLER).unwrap();
        assert!(matches!(spec, HandlerSpec::Static { status: 501, .. }));
    }

    #[test]
    fn test_parse_rejects_bad_sources() {
        assert!(HandlerSpec::parse("module.exports = router;").is_err());
        assert!(HandlerSpec::parse(r#"{"type":"static","status":1000}"#).is_err());
        assert!(HandlerSpec::parse(r#"{"type":"proxy","target":"ftp://x"}"#).is_err());
        assert!(HandlerSpec::parse(r#"{"type":"proxy","target":"/relative"}"#).is_err());
        assert!(HandlerSpec::parse(r#"{"type":"lambda"}"#).is_err());
    }

    #[tokio::test]
    async fn test_static_handler_response() {
        let spec = HandlerSpec::parse(
            r#"{"type":"static","status":201,"headers":{"x-env":"test"},"body":{"ok":true}}"#,
        )
        .unwrap();
        let handler = spec.into_handler("demo", Arc::new(RecordingClient::default()));

        let response = handler
            .handle(Request::new(AxumBody::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-env"], "test");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_proxy_rewrites_request() {
        let client = Arc::new(RecordingClient::default());
        let spec = HandlerSpec::parse(r#"{"type":"proxy","target":"https://upstream.test/v1/"}"#)
            .unwrap();
        let handler = spec.into_handler("weather", client.clone());

        let mut req = Request::builder()
            .uri("/api/weather/today?city=Oslo")
            .header(header::AUTHORIZATION, "Bearer matic-secret")
            .header(header::HOST, "gateway.local")
            .body(AxumBody::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ClientIdentity("203.0.113.5".to_string()));

        let response = handler.handle(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (uri, headers) = client.seen.lock().unwrap().clone().unwrap();
        assert_eq!(uri.to_string(), "https://upstream.test/v1/today?city=Oslo");
        assert!(headers.get(header::AUTHORIZATION).is_none());
        assert_eq!(headers["x-forwarded-for"], "203.0.113.5");
        assert_eq!(headers["x-forwarded-host"], "gateway.local");
    }

    #[tokio::test]
    async fn test_static_handler_configured_content_type_replaces_default() {
        let spec = HandlerSpec::parse(
            r#"{"type":"static","headers":{"Content-Type":"application/xml"},"body":"<ok/>"}"#,
        )
        .unwrap();
        let handler = spec.into_handler("feed", Arc::new(RecordingClient::default()));

        let response = handler
            .handle(Request::new(AxumBody::empty()))
            .await
            .unwrap();
        let content_types: Vec<_> = response
            .headers()
            .get_all(header::CONTENT_TYPE)
            .iter()
            .collect();
        assert_eq!(content_types, vec!["application/xml"]);
    }

    #[tokio::test]
    async fn test_proxy_appends_to_forwarded_chain() {
        let client = Arc::new(RecordingClient::default());
        let spec =
            HandlerSpec::parse(r#"{"type":"proxy","target":"http://upstream.test"}"#).unwrap();
        let handler = spec.into_handler("chain", client.clone());

        let mut req = Request::builder()
            .uri("/api/chain")
            .header("x-forwarded-for", "198.51.100.7, 203.0.113.9")
            .body(AxumBody::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ClientIdentity("203.0.113.9".to_string()));
        req.extensions_mut()
            .insert(ConnectInfo::<SocketAddr>("10.0.0.2:51000".parse().unwrap()));

        handler.handle(req).await.unwrap();

        let (_, headers) = client.seen.lock().unwrap().clone().unwrap();
        assert_eq!(
            headers["x-forwarded-for"],
            "198.51.100.7, 203.0.113.9, 10.0.0.2"
        );
    }

    #[tokio::test]
    async fn test_proxy_timeout_maps_to_gateway_timeout() {
        let client = Arc::new(RecordingClient {
            fail_with_timeout: true,
            ..RecordingClient::default()
        });
        let spec =
            HandlerSpec::parse(r#"{"type":"proxy","target":"http://upstream.test"}"#).unwrap();
        let handler = spec.into_handler("slow", client);

        let err = handler
            .handle(Request::new(AxumBody::empty()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_load_route_table_skips_broken_sources() {
        let dir = TempDir::new().unwrap();
        let registry = EndpointRegistry::open(dir.path()).await.unwrap();
        registry
            .create(NewEndpoint {
                name: Some("weather".to_string()),
                title: Some("Weather".to_string()),
                method: Some("GET".to_string()),
                path: Some("/api/weather".to_string()),
                ..NewEndpoint::default()
            })
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("broken.handler"), "not json")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("admin.handler"), STUB_HANDLER)
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("Bad_Name.handler"), STUB_HANDLER)
            .await
            .unwrap();

        let routes = load_route_table(&registry, Arc::new(RecordingClient::default())).await;
        assert_eq!(routes.len(), 1);
        assert_eq!(routes["weather"].kind(), "static");
    }
}
