use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tracing::Instrument;

use crate::{
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
    tracing_setup::create_upstream_span,
};

const USER_AGENT: &str = concat!("apigate/", env!("CARGO_PKG_VERSION"));

/// HTTP client adapter using Hyper with Rustls (HTTP/1.1 + HTTP/2 via ALPN).
///
/// Used by proxy handlers to forward requests to their upstream. Retries and
/// circuit breaking are out of scope here.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
}

impl HttpClientAdapter {
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::info!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        tracing::info!("Created upstream HTTP client");
        Ok(Self { client })
    }

    /// Set `Host` from the target URI and a default `User-Agent`.
    fn prepare_headers(req: &mut Request<AxumBody>) -> HttpClientResult<()> {
        let Some(host) = req.uri().host() else {
            return Err(HttpClientError::InvalidRequest(
                "Outgoing URI has no host".to_string(),
            ));
        };
        let host = match req.uri().port_u16() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let host = HeaderValue::from_str(&host)
            .map_err(|e| HttpClientError::InvalidRequest(format!("Invalid host: {e}")))?;

        let headers = req.headers_mut();
        headers.insert(header::HOST, host);
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        }
        Ok(())
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
        timeout: Duration,
    ) -> HttpClientResult<Response<AxumBody>> {
        Self::prepare_headers(&mut req)?;
        *req.version_mut() = Version::HTTP_11;

        let target = req.uri().to_string();
        let method = req.method().to_string();
        let span = create_upstream_span(&target, &method);

        let client = self.client.clone();
        async move {
            tracing::debug!(headers = ?req.headers(), "Forwarding request upstream");

            let response = match tokio::time::timeout(timeout, client.request(req)).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    tracing::Span::current().record("http.status_code", 502u16);
                    tracing::error!(error = %e, "Upstream request failed");
                    return Err(HttpClientError::ConnectionError(format!(
                        "Request to {method} {target} failed: {e}"
                    )));
                }
                Err(_) => {
                    tracing::Span::current().record("http.status_code", 504u16);
                    tracing::warn!(?timeout, "Upstream request timed out");
                    return Err(HttpClientError::Timeout(timeout));
                }
            };

            tracing::Span::current().record("http.status_code", response.status().as_u16());

            let (mut parts, body) = response.into_parts();
            // Axum re-frames the streamed body.
            parts.headers.remove(header::TRANSFER_ENCODING);
            Ok(Response::from_parts(parts, AxumBody::new(body)))
        }
        .instrument(span)
        .await
    }
}
