//! Prometheus-style metric helpers for apigate.
//!
//! Thin wrappers over the `metrics` crate macros. No exporter is embedded; an
//! embedding application installs whichever recorder it wants and these
//! counters show up there. The figures served by `/api/server-metrics` come
//! from `core::metrics_collector`, not from here.
//!
//! Provided metrics:
//! * `apigate_requests_total` (counter; labels `endpoint`, `method`, `status`)
//! * `apigate_request_duration_seconds` (histogram; labels `endpoint`, `method`)
//! * `apigate_rate_limited_total` (counter)
//! * `apigate_auth_failures_total` (counter; label `reason`)
//! * `apigate_api_keys_issued_total` (counter)
//! * `apigate_registry_mutations_total` (counter; label `operation`)
use std::{sync::Once, time::Instant};

use metrics::{Unit, counter, describe_counter, describe_histogram, histogram};

pub const APIGATE_REQUESTS_TOTAL: &str = "apigate_requests_total";
pub const APIGATE_REQUEST_DURATION_SECONDS: &str = "apigate_request_duration_seconds";
pub const APIGATE_RATE_LIMITED_TOTAL: &str = "apigate_rate_limited_total";
pub const APIGATE_AUTH_FAILURES_TOTAL: &str = "apigate_auth_failures_total";
pub const APIGATE_API_KEYS_ISSUED_TOTAL: &str = "apigate_api_keys_issued_total";
pub const APIGATE_REGISTRY_MUTATIONS_TOTAL: &str = "apigate_registry_mutations_total";

static DESCRIBE: Once = Once::new();

/// Register metric descriptions with the installed recorder (idempotent).
pub fn init_metrics() {
    DESCRIBE.call_once(|| {
        describe_counter!(
            APIGATE_REQUESTS_TOTAL,
            Unit::Count,
            "Total number of API requests handled by the gateway."
        );
        describe_histogram!(
            APIGATE_REQUEST_DURATION_SECONDS,
            Unit::Seconds,
            "Latency of API requests handled by the gateway."
        );
        describe_counter!(
            APIGATE_RATE_LIMITED_TOTAL,
            Unit::Count,
            "Requests rejected because the caller exhausted its quota."
        );
        describe_counter!(
            APIGATE_AUTH_FAILURES_TOTAL,
            Unit::Count,
            "Requests rejected during API key authentication."
        );
        describe_counter!(
            APIGATE_API_KEYS_ISSUED_TOTAL,
            Unit::Count,
            "API keys minted for new identities."
        );
        describe_counter!(
            APIGATE_REGISTRY_MUTATIONS_TOTAL,
            Unit::Count,
            "Successful admin mutations of the endpoint and monitor registries."
        );
        tracing::debug!("Registered apigate metric descriptions");
    });
}

/// Increment the request counter for a finished API request.
pub fn increment_request_total(endpoint: &str, method: &str, status: u16) {
    counter!(
        APIGATE_REQUESTS_TOTAL,
        "endpoint" => endpoint.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_request_duration(endpoint: &str, method: &str, duration: std::time::Duration) {
    histogram!(
        APIGATE_REQUEST_DURATION_SECONDS,
        "endpoint" => endpoint.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn increment_rate_limited() {
    counter!(APIGATE_RATE_LIMITED_TOTAL).increment(1);
}

/// `reason` is `missing` or `invalid`.
pub fn increment_auth_failure(reason: &'static str) {
    counter!(APIGATE_AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
}

pub fn increment_api_keys_issued() {
    counter!(APIGATE_API_KEYS_ISSUED_TOTAL).increment(1);
}

pub fn increment_registry_mutation(operation: &'static str) {
    counter!(APIGATE_REGISTRY_MUTATIONS_TOTAL, "operation" => operation).increment(1);
}

/// RAII helper recording an API request's duration when dropped.
pub struct RequestTimer {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestTimer {
    pub fn new(endpoint: &str, method: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        record_request_duration(&self.endpoint, &self.method, self.start.elapsed());
    }
}
