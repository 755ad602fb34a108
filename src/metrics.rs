//! Request outcomes and the sink that aggregates them.
//!
//! Users report every call, successful or not, as a [`RequestOutcome`].
//! The sink is shared by all users and only ever appended to.

use hdrhistogram::{CreationError, Histogram};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::client::Response;
use crate::error::Error;

pub const REQUEST_TYPE: &str = "TCP";
pub const REQUEST_NAME: &str = "nice_tcp_request";

/// Result of one call, as reported to the sink.
#[derive(Debug)]
pub struct RequestOutcome {
    pub request_type: &'static str,
    pub name: &'static str,
    /// Zero on failure.
    pub response_time_ms: f64,
    /// Response frame size in bytes; zero on failure.
    pub response_length: usize,
    pub error: Option<Error>,
}

impl RequestOutcome {
    pub fn success(response: &Response) -> Self {
        Self {
            request_type: REQUEST_TYPE,
            name: REQUEST_NAME,
            response_time_ms: response.elapsed_ms(),
            response_length: response.wire_len,
            error: None,
        }
    }

    pub fn failure(error: Error) -> Self {
        Self {
            request_type: REQUEST_TYPE,
            name: REQUEST_NAME,
            response_time_ms: 0.0,
            response_length: 0,
            error: Some(error),
        }
    }

    pub fn from_result(result: Result<Response, Error>) -> Self {
        match result {
            Ok(response) => Self::success(&response),
            Err(error) => Self::failure(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Destination for outcomes. Must accept concurrent reports.
pub trait OutcomeSink: Send + Sync + 'static {
    fn record(&self, outcome: RequestOutcome);
}

/// Point-in-time view of the aggregated statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub failures: u64,
    pub rps: f64,
    pub min_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub avg_size: u64,
}

/// Aggregating sink: counters, a latency histogram and failure counts.
pub struct Stats {
    started: Instant,
    requests: AtomicU64,
    failures: AtomicU64,
    bytes: AtomicU64,
    /// Successful response times in microseconds.
    latencies: Mutex<Histogram<u64>>,
    errors: Mutex<HashMap<String, u64>>,
}

/// 1 µs to 1 h at three significant digits.
const LATENCY_MAX_US: u64 = 3_600_000_000;

impl Stats {
    pub fn new() -> Result<Arc<Self>, CreationError> {
        Ok(Arc::new(Self {
            started: Instant::now(),
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            latencies: Mutex::new(Histogram::new_with_bounds(1, LATENCY_MAX_US, 3)?),
            errors: Mutex::new(HashMap::new()),
        }))
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let bytes = self.bytes.load(Ordering::Relaxed);
        let elapsed = self.started.elapsed().as_secs_f64();

        let mut snapshot = StatsSnapshot {
            requests,
            failures,
            rps: if elapsed > 0.0 { requests as f64 / elapsed } else { 0.0 },
            ..Default::default()
        };

        let successes = requests.saturating_sub(failures);
        if successes > 0 {
            snapshot.avg_size = bytes / successes;
        }

        if let Ok(hist) = self.latencies.lock() {
            if hist.len() > 0 {
                let ms = |us: u64| us as f64 / 1000.0;
                snapshot.min_ms = ms(hist.min());
                snapshot.avg_ms = hist.mean() / 1000.0;
                snapshot.max_ms = ms(hist.max());
                snapshot.p50_ms = ms(hist.value_at_quantile(0.50));
                snapshot.p95_ms = ms(hist.value_at_quantile(0.95));
                snapshot.p99_ms = ms(hist.value_at_quantile(0.99));
            }
        }

        snapshot
    }

    /// Failure messages with their counts, most frequent first.
    pub fn failure_breakdown(&self) -> Vec<(String, u64)> {
        let mut failures: Vec<(String, u64)> = self
            .errors
            .lock()
            .map(|errors| errors.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default();
        failures.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        failures
    }

    /// Log the final summary and failure breakdown.
    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            requests = s.requests,
            failures = s.failures,
            rps = %format!("{:.1}", s.rps),
            avg_ms = %format!("{:.1}", s.avg_ms),
            min_ms = %format!("{:.1}", s.min_ms),
            max_ms = %format!("{:.1}", s.max_ms),
            p50_ms = %format!("{:.1}", s.p50_ms),
            p95_ms = %format!("{:.1}", s.p95_ms),
            p99_ms = %format!("{:.1}", s.p99_ms),
            avg_size = s.avg_size,
            "Load test summary"
        );
        for (message, count) in self.failure_breakdown() {
            warn!(count, error = %message, "Failures");
        }
    }
}

impl OutcomeSink for Stats {
    fn record(&self, outcome: RequestOutcome) {
        self.requests.fetch_add(1, Ordering::Relaxed);

        match outcome.error {
            None => {
                self.bytes
                    .fetch_add(outcome.response_length as u64, Ordering::Relaxed);
                let us = (outcome.response_time_ms * 1000.0).round() as u64;
                if let Ok(mut hist) = self.latencies.lock() {
                    // saturating: out-of-range samples land in the top bucket
                    hist.saturating_record(us.max(1));
                }
            }
            Some(error) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut errors) = self.errors.lock() {
                    *errors.entry(error.to_string()).or_insert(0) += 1;
                }
            }
        }
    }
}

/// Log a snapshot every `interval` until the task is aborted.
pub async fn report_task(stats: Arc<Stats>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let s = stats.snapshot();
        info!(
            requests = s.requests,
            failures = s.failures,
            rps = %format!("{:.1}", s.rps),
            p50_ms = %format!("{:.1}", s.p50_ms),
            p95_ms = %format!("{:.1}", s.p95_ms),
            "Progress"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FramePart;

    fn response(ms: u64, len: usize) -> Response {
        Response {
            text: String::new(),
            wire_len: len,
            elapsed: Duration::from_millis(ms),
        }
    }

    #[test]
    fn test_outcome_fields() {
        let ok = RequestOutcome::from_result(Ok(response(12, 15)));
        assert!(ok.is_success());
        assert_eq!(ok.request_type, "TCP");
        assert_eq!(ok.name, "nice_tcp_request");
        assert_eq!(ok.response_time_ms, 12.0);
        assert_eq!(ok.response_length, 15);

        let failed = RequestOutcome::from_result(Err(Error::Closed(FramePart::Header)));
        assert!(!failed.is_success());
        assert_eq!(failed.response_time_ms, 0.0);
        assert_eq!(failed.response_length, 0);
    }

    #[test]
    fn test_stats_aggregation() {
        let stats = Stats::new().unwrap();
        for ms in [10, 20, 30, 40] {
            stats.record(RequestOutcome::success(&response(ms, 100)));
        }
        stats.record(RequestOutcome::failure(Error::Closed(FramePart::Data)));
        stats.record(RequestOutcome::failure(Error::Closed(FramePart::Data)));
        stats.record(RequestOutcome::failure(Error::Protocol("bad".into())));

        let s = stats.snapshot();
        assert_eq!(s.requests, 7);
        assert_eq!(s.failures, 3);
        assert_eq!(s.avg_size, 100);
        assert!((s.min_ms - 10.0).abs() < 0.1);
        assert!((s.max_ms - 40.0).abs() < 0.1);
        assert!((s.avg_ms - 25.0).abs() < 0.1);

        let breakdown = stats.failure_breakdown();
        assert_eq!(breakdown.len(), 2);
        assert_eq!(breakdown[0], ("Connection closed while reading data".to_string(), 2));
    }

    #[test]
    fn test_stats_concurrent_reports() {
        let stats = Stats::new().unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        stats.record(RequestOutcome::success(&response(1 + i % 5, 10)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let s = stats.snapshot();
        assert_eq!(s.requests, 2000);
        assert_eq!(s.failures, 0);
    }

    #[test]
    fn test_empty_snapshot() {
        let s = Stats::new().unwrap().snapshot();
        assert_eq!(s.requests, 0);
        assert_eq!(s.p99_ms, 0.0);
    }
}
