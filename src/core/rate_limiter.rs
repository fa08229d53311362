//! Per-identity request quota for dynamic API routes.
//!
//! Each identity owns a fixed window that opens with its first counted request
//! and lasts `period`. The window holds at most `requests` admissions; further
//! requests are rejected until the window expires and a new one opens.
//! Privileged callers are exempt and never touch the counters.
//!
//! State lives in a `scc::HashMap` so checks for different identities do not
//! contend; the entry lock makes the count-then-admit step atomic per identity.
use std::time::{Duration, Instant};

use axum::{
    Json,
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use scc::HashMap;
use serde_json::json;

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started: Instant,
    count: u32,
}

/// Outcome of a single quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Privileged caller; no counter was touched.
    Exempt,
    Allowed {
        limit: u32,
        remaining: u32,
        reset_after: Duration,
    },
    Limited {
        limit: u32,
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    pub fn is_limited(&self) -> bool {
        matches!(self, RateLimitDecision::Limited { .. })
    }
}

pub struct RateLimiter {
    limit: u32,
    period: Duration,
    status_code: StatusCode,
    message: String,
    windows: HashMap<String, WindowState>,
}

impl RateLimiter {
    /// Build a limiter from its configuration section.
    pub fn new(config: &RateLimitConfig) -> Result<Self, String> {
        let period = humantime::parse_duration(&config.period)
            .map_err(|e| format!("Invalid period string '{}': {e}", config.period))?;
        if period.is_zero() {
            return Err("Rate limit period must be greater than 0".to_string());
        }
        if config.requests == 0 {
            return Err("Rate limit 'requests' must be greater than 0".to_string());
        }
        let status_code = StatusCode::from_u16(config.status_code)
            .map_err(|_| format!("Invalid status code: {}", config.status_code))?;

        tracing::info!(
            requests = config.requests,
            period = %config.period,
            status_code = config.status_code,
            "Creating per-identity rate limiter"
        );

        Ok(Self {
            limit: config.requests,
            period,
            status_code,
            message: config.message.clone(),
            windows: HashMap::new(),
        })
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Count one request for `identity` unless `privileged`.
    pub async fn check(&self, identity: &str, privileged: bool) -> RateLimitDecision {
        self.check_at(identity, privileged, Instant::now()).await
    }

    pub async fn check_at(&self, identity: &str, privileged: bool, now: Instant) -> RateLimitDecision {
        if privileged {
            return RateLimitDecision::Exempt;
        }

        let mut entry = self
            .windows
            .entry_async(identity.to_string())
            .await
            .or_insert_with(|| WindowState {
                started: now,
                count: 0,
            });
        let window = entry.get_mut();

        let elapsed = now.saturating_duration_since(window.started);
        if elapsed >= self.period {
            window.started = now;
            window.count = 0;
        }
        let reset_after = self
            .period
            .saturating_sub(now.saturating_duration_since(window.started));

        if window.count >= self.limit {
            return RateLimitDecision::Limited {
                limit: self.limit,
                retry_after: reset_after,
            };
        }

        window.count += 1;
        RateLimitDecision::Allowed {
            limit: self.limit,
            remaining: self.limit - window.count,
            reset_after,
        }
    }

    /// Drop windows that expired before `now`. Returns how many were removed.
    pub async fn prune_expired(&self, now: Instant) -> usize {
        let before = self.windows.len();
        let period = self.period;
        self.windows
            .retain_async(|_, window| now.saturating_duration_since(window.started) < period)
            .await;
        before.saturating_sub(self.windows.len())
    }

    /// Number of identities with a tracked window.
    pub fn tracked_identities(&self) -> usize {
        self.windows.len()
    }

    /// Rejection returned to a caller over quota.
    pub fn rejection(&self, retry_after: Duration) -> Response {
        let reset_secs = ceil_secs(retry_after);
        let mut response = (
            self.status_code,
            Json(json!({ "success": false, "message": self.message })),
        )
            .into_response();

        let headers = response.headers_mut();
        headers.insert(header::RETRY_AFTER, HeaderValue::from(reset_secs));
        headers.insert(RATELIMIT_LIMIT.clone(), HeaderValue::from(self.limit));
        headers.insert(RATELIMIT_REMAINING.clone(), HeaderValue::from(0u32));
        headers.insert(RATELIMIT_RESET.clone(), HeaderValue::from(reset_secs));
        response
    }

    /// Annotate a response that was admitted under quota.
    pub fn annotate(&self, decision: &RateLimitDecision, response: &mut Response) {
        if let RateLimitDecision::Allowed {
            limit,
            remaining,
            reset_after,
        } = decision
        {
            let headers = response.headers_mut();
            headers.insert(RATELIMIT_LIMIT.clone(), HeaderValue::from(*limit));
            headers.insert(RATELIMIT_REMAINING.clone(), HeaderValue::from(*remaining));
            headers.insert(
                RATELIMIT_RESET.clone(),
                HeaderValue::from(ceil_secs(*reset_after)),
            );
        }
    }
}

static RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
static RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
static RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 { secs + 1 } else { secs }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(requests: u32, period: &str) -> RateLimitConfig {
        RateLimitConfig {
            requests,
            period: period.to_string(),
            ..RateLimitConfig::default()
        }
    }

    #[test]
    fn test_invalid_period() {
        assert!(RateLimiter::new(&config(5, "invalid")).is_err());
        assert!(RateLimiter::new(&config(5, "0s")).is_err());
    }

    #[test]
    fn test_zero_requests() {
        assert!(RateLimiter::new(&config(0, "10m")).is_err());
    }

    #[tokio::test]
    async fn test_hundred_and_first_request_is_limited() {
        let limiter = RateLimiter::new(&RateLimitConfig::default()).unwrap();
        let now = Instant::now();

        for i in 0..100 {
            let decision = limiter.check_at("10.0.0.1", false, now).await;
            assert!(!decision.is_limited(), "request {} was limited", i + 1);
        }

        let decision = limiter.check_at("10.0.0.1", false, now).await;
        assert!(decision.is_limited());
    }

    #[tokio::test]
    async fn test_privileged_is_exempt() {
        let limiter = RateLimiter::new(&config(2, "10m")).unwrap();
        let now = Instant::now();

        for _ in 0..10 {
            assert_eq!(
                limiter.check_at("10.0.0.1", true, now).await,
                RateLimitDecision::Exempt
            );
        }
        assert_eq!(limiter.tracked_identities(), 0);

        // The exemption did not consume the identity's quota.
        assert!(!limiter.check_at("10.0.0.1", false, now).await.is_limited());
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let limiter = RateLimiter::new(&config(1, "10m")).unwrap();
        let now = Instant::now();

        assert!(!limiter.check_at("a", false, now).await.is_limited());
        assert!(limiter.check_at("a", false, now).await.is_limited());
        assert!(!limiter.check_at("b", false, now).await.is_limited());
    }

    #[tokio::test]
    async fn test_window_expiry_restores_quota() {
        let limiter = RateLimiter::new(&config(2, "10m")).unwrap();
        let start = Instant::now();

        limiter.check_at("ip", false, start).await;
        limiter.check_at("ip", false, start).await;
        let limited = limiter
            .check_at("ip", false, start + Duration::from_secs(300))
            .await;
        let RateLimitDecision::Limited { retry_after, .. } = limited else {
            panic!("expected limit, got {limited:?}");
        };
        assert_eq!(retry_after, Duration::from_secs(300));

        let later = start + Duration::from_secs(601);
        let decision = limiter.check_at("ip", false, later).await;
        assert!(matches!(
            decision,
            RateLimitDecision::Allowed { remaining: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_prune_expired() {
        let limiter = RateLimiter::new(&config(5, "1m")).unwrap();
        let start = Instant::now();
        limiter.check_at("old", false, start).await;
        limiter
            .check_at("new", false, start + Duration::from_secs(50))
            .await;

        let removed = limiter.prune_expired(start + Duration::from_secs(70)).await;
        assert_eq!(removed, 1);
        assert_eq!(limiter.tracked_identities(), 1);
    }

    #[test]
    fn test_rejection_headers() {
        let limiter = RateLimiter::new(&config(100, "10m")).unwrap();
        let response = limiter.rejection(Duration::from_millis(1500));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
        assert_eq!(response.headers()["ratelimit-limit"], "100");
        assert_eq!(response.headers()["ratelimit-remaining"], "0");
    }
}
