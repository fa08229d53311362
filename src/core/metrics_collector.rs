//! In-process request statistics exposed by `/server-metrics`.
//!
//! Only raw counters are stored; every derived figure (rates, averages,
//! uptime breakdown) is computed when a snapshot is taken. Success means a
//! final status in `[200, 400)`, and only successful requests feed latency
//! and throughput.
use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};

use serde::Serialize;

use crate::config::{MetricsConfig, ThroughputMode};

/// Prefix identifying dynamic API routes.
pub const API_NAMESPACE: &str = "/api/";

/// `true` when `path` belongs to the dynamic API namespace.
pub fn is_namespaced(path: &str) -> bool {
    path.starts_with(API_NAMESPACE)
}

/// First path segment after `/api/`, if any.
pub fn endpoint_name(path: &str) -> Option<&str> {
    path.strip_prefix(API_NAMESPACE)?
        .split('/')
        .next()
        .filter(|s| !s.is_empty())
}

#[derive(Debug, Default, Clone, Copy)]
struct RequestCounters {
    total_requests: u64,
    successful_requests: u64,
    total_response_time_ms: f64,
}

impl RequestCounters {
    fn record(&mut self, success: bool, elapsed: Duration) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
            self.total_response_time_ms += elapsed.as_secs_f64() * 1000.0;
        }
    }

    fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64 * 100.0
        }
    }

    fn avg_response_ms(&self) -> f64 {
        if self.successful_requests == 0 {
            0.0
        } else {
            self.total_response_time_ms / self.successful_requests as f64
        }
    }
}

#[derive(Debug)]
enum ThroughputMeter {
    /// Per-second buckets `(second since start, successes)` covering the
    /// last `window` seconds.
    Windowed {
        window: u64,
        buckets: VecDeque<(u64, u64)>,
    },
    /// Successes since the previous snapshot.
    SinceLastRead { requests: u64, last_read: Instant },
}

impl ThroughputMeter {
    fn new(config: &MetricsConfig, started: Instant) -> Self {
        match config.throughput {
            ThroughputMode::Windowed => ThroughputMeter::Windowed {
                window: config.window_secs.max(1),
                buckets: VecDeque::new(),
            },
            ThroughputMode::SinceLastRead => ThroughputMeter::SinceLastRead {
                requests: 0,
                last_read: started,
            },
        }
    }

    fn record(&mut self, second: u64) {
        match self {
            ThroughputMeter::Windowed { window, buckets } => {
                match buckets.back_mut() {
                    Some((s, count)) if *s == second => *count += 1,
                    _ => buckets.push_back((second, 1)),
                }
                let window = *window;
                while buckets
                    .front()
                    .is_some_and(|(s, _)| second.saturating_sub(*s) >= window)
                {
                    buckets.pop_front();
                }
            }
            ThroughputMeter::SinceLastRead { requests, .. } => *requests += 1,
        }
    }

    /// Requests per second. Only the since-last-read meter is reset by reading.
    fn read(&mut self, second: u64, uptime: Duration, now: Instant) -> f64 {
        match self {
            ThroughputMeter::Windowed { window, buckets } => {
                let window = *window;
                let in_window: u64 = buckets
                    .iter()
                    .filter(|(s, _)| second.saturating_sub(*s) < window)
                    .map(|(_, count)| count)
                    .sum();
                // Before the first full window, divide by the time actually elapsed.
                let span = uptime.as_secs_f64().clamp(1.0, window as f64);
                in_window as f64 / span
            }
            ThroughputMeter::SinceLastRead {
                requests,
                last_read,
            } => {
                let elapsed = now.saturating_duration_since(*last_read).as_secs_f64();
                let rate = if elapsed > 0.0 {
                    *requests as f64 / elapsed
                } else {
                    0.0
                };
                *requests = 0;
                *last_read = now;
                rate
            }
        }
    }
}

#[derive(Debug)]
struct MetricsState {
    started: Instant,
    global: RequestCounters,
    endpoints: BTreeMap<String, RequestCounters>,
    throughput: ThroughputMeter,
}

/// Uptime split into calendar-ish units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UptimeBreakdown {
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl From<Duration> for UptimeBreakdown {
    fn from(uptime: Duration) -> Self {
        let total = uptime.as_secs();
        Self {
            days: total / 86_400,
            hours: (total % 86_400) / 3_600,
            minutes: (total % 3_600) / 60,
            seconds: total % 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStats {
    pub name: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub success_rate: String,
    pub avg_response_time: String,
}

/// Point-in-time view rendered by `/server-metrics`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub uptime: UptimeBreakdown,
    pub success_rate: String,
    pub avg_response_time: String,
    pub requests_per_second: String,
    pub requests_per_minute: String,
    /// Sorted by endpoint name.
    pub endpoint_details: Vec<EndpointStats>,
}

pub struct MetricsCollector {
    state: Mutex<MetricsState>,
}

impl MetricsCollector {
    pub fn new(config: &MetricsConfig) -> Self {
        Self::new_at(config, Instant::now())
    }

    pub fn new_at(config: &MetricsConfig, started: Instant) -> Self {
        Self {
            state: Mutex::new(MetricsState {
                started,
                global: RequestCounters::default(),
                endpoints: BTreeMap::new(),
                throughput: ThroughputMeter::new(config, started),
            }),
        }
    }

    /// Record one finished request. `endpoint` is the dynamic route name, if
    /// the request targeted one.
    pub fn record(&self, endpoint: Option<&str>, status: u16, elapsed: Duration) {
        self.record_at(endpoint, status, elapsed, Instant::now());
    }

    pub fn record_at(&self, endpoint: Option<&str>, status: u16, elapsed: Duration, now: Instant) {
        let success = (200..400).contains(&status);
        let mut state = self.lock();

        state.global.record(success, elapsed);
        if let Some(name) = endpoint {
            state
                .endpoints
                .entry(name.to_string())
                .or_default()
                .record(success, elapsed);
        }
        if success {
            let second = now.saturating_duration_since(state.started).as_secs();
            state.throughput.record(second);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> MetricsSnapshot {
        let mut state = self.lock();
        let uptime = now.saturating_duration_since(state.started);
        let second = uptime.as_secs();
        // Per-minute figure is derived from the two-decimal per-second one.
        let rps = (state.throughput.read(second, uptime, now) * 100.0).round() / 100.0;

        let endpoint_details = state
            .endpoints
            .iter()
            .map(|(name, counters)| EndpointStats {
                name: name.clone(),
                total_requests: counters.total_requests,
                successful_requests: counters.successful_requests,
                success_rate: format_percent(counters.success_rate()),
                avg_response_time: format_ms(counters.avg_response_ms()),
            })
            .collect();

        MetricsSnapshot {
            total_requests: state.global.total_requests,
            successful_requests: state.global.successful_requests,
            uptime: UptimeBreakdown::from(uptime),
            success_rate: format_percent(state.global.success_rate()),
            avg_response_time: format_ms(state.global.avg_response_ms()),
            requests_per_second: format!("{rps:.2}"),
            requests_per_minute: format!("{:.2}", rps * 60.0),
            endpoint_details,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        // Counters stay meaningful even if a holder panicked mid-update.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn format_percent(value: f64) -> String {
    format!("{value:.1}%")
}

fn format_ms(value: f64) -> String {
    format!("{value:.2}ms")
}
