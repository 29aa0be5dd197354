//! Prometheus metrics endpoint

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::state::AppState;

/// Application metrics for Prometheus
pub struct Metrics {
    started: Instant,
    /// Total requests processed
    pub requests_total: AtomicU64,
    /// Requests answered with a server error
    pub request_errors_total: AtomicU64,
    /// Successful snapshot refreshes
    pub snapshot_refresh_total: AtomicU64,
    /// Failed snapshot refreshes
    pub snapshot_refresh_failures_total: AtomicU64,
    /// Completed aggregation passes
    pub aggregations_total: AtomicU64,
    /// Aggregation passes that failed to decode the snapshot
    pub aggregation_failures_total: AtomicU64,
    /// Duration of the last aggregation pass
    last_aggregation_micros: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            requests_total: AtomicU64::new(0),
            request_errors_total: AtomicU64::new(0),
            snapshot_refresh_total: AtomicU64::new(0),
            snapshot_refresh_failures_total: AtomicU64::new(0),
            aggregations_total: AtomicU64::new(0),
            aggregation_failures_total: AtomicU64::new(0),
            last_aggregation_micros: AtomicU64::new(0),
        }
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_requests(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_request_errors(&self) {
        self.request_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_refreshes(&self) {
        self.snapshot_refresh_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_refresh_failures(&self) {
        self.snapshot_refresh_failures_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aggregation(&self, elapsed: Duration) {
        self.aggregations_total.fetch_add(1, Ordering::Relaxed);
        self.last_aggregation_micros
            .store(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn inc_aggregation_failures(&self) {
        self.aggregation_failures_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            request_errors_total: self.request_errors_total.load(Ordering::Relaxed),
            snapshot_refresh_total: self.snapshot_refresh_total.load(Ordering::Relaxed),
            snapshot_refresh_failures_total: self
                .snapshot_refresh_failures_total
                .load(Ordering::Relaxed),
            aggregations_total: self.aggregations_total.load(Ordering::Relaxed),
            aggregation_failures_total: self.aggregation_failures_total.load(Ordering::Relaxed),
            last_aggregation_seconds: self.last_aggregation_micros.load(Ordering::Relaxed) as f64
                / 1_000_000.0,
            uptime_seconds: self.started.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub request_errors_total: u64,
    pub snapshot_refresh_total: u64,
    pub snapshot_refresh_failures_total: u64,
    pub aggregations_total: u64,
    pub aggregation_failures_total: u64,
    pub last_aggregation_seconds: f64,
    pub uptime_seconds: f64,
}

/// Middleware counting every request and its server errors
pub async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    state.metrics.inc_requests();
    let response = next.run(request).await;
    if response.status().is_server_error() {
        state.metrics.inc_request_errors();
    }
    response
}

fn metric(out: &mut String, prefix: &str, name: &str, kind: &str, help: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "# HELP {}_{} {}", prefix, name, help);
    let _ = writeln!(out, "# TYPE {}_{} {}", prefix, name, kind);
    let _ = writeln!(out, "{}_{} {}", prefix, name, value);
    out.push('\n');
}

/// Render Prometheus text for the given state.
pub fn render(state: &AppState) -> String {
    let prefix = state.config.metrics_prefix.as_str();
    let snapshot = state.metrics.get_metrics();
    let mut out = String::new();

    metric(&mut out, prefix, "requests_total", "counter", "Total number of HTTP requests processed", snapshot.requests_total);
    metric(&mut out, prefix, "request_errors_total", "counter", "Total number of HTTP requests answered with a server error", snapshot.request_errors_total);
    metric(&mut out, prefix, "snapshot_refresh_total", "counter", "Total number of successful snapshot refreshes", snapshot.snapshot_refresh_total);
    metric(&mut out, prefix, "snapshot_refresh_failures_total", "counter", "Total number of failed snapshot refreshes", snapshot.snapshot_refresh_failures_total);
    metric(&mut out, prefix, "aggregations_total", "counter", "Total number of aggregation passes", snapshot.aggregations_total);
    metric(&mut out, prefix, "aggregation_failures_total", "counter", "Total number of aggregation passes that could not decode the snapshot", snapshot.aggregation_failures_total);
    metric(&mut out, prefix, "last_aggregation_seconds", "gauge", "Duration of the last aggregation pass", snapshot.last_aggregation_seconds);

    if let Some(current) = state.cache.current() {
        let age = (chrono::Utc::now() - current.fetched_at).num_milliseconds() as f64 / 1000.0;
        metric(&mut out, prefix, "snapshot_bytes", "gauge", "Size of the current snapshot", current.data.len());
        metric(&mut out, prefix, "snapshot_age_seconds", "gauge", "Age of the current snapshot", age);
    }

    metric(&mut out, prefix, "uptime_seconds", "gauge", "Server uptime", snapshot.uptime_seconds);

    if let Ok(load) = sys_info::loadavg() {
        let _ = writeln!(out, "# HELP {}_load average host load", prefix);
        let _ = writeln!(out, "# TYPE {}_load gauge", prefix);
        let _ = writeln!(out, "{}_load{{period=\"1m\"}} {}", prefix, load.one);
        let _ = writeln!(out, "{}_load{{period=\"5m\"}} {}", prefix, load.five);
        let _ = writeln!(out, "{}_load{{period=\"15m\"}} {}", prefix, load.fifteen);
        out.push('\n');
    }
    if let Ok(mem) = sys_info::mem_info() {
        let _ = writeln!(out, "# HELP {}_memory_kb host memory in kilobytes", prefix);
        let _ = writeln!(out, "# TYPE {}_memory_kb gauge", prefix);
        let _ = writeln!(out, "{}_memory_kb{{type=\"total\"}} {}", prefix, mem.total);
        let _ = writeln!(out, "{}_memory_kb{{type=\"free\"}} {}", prefix, mem.free);
        let _ = writeln!(out, "{}_memory_kb{{type=\"avail\"}} {}", prefix, mem.avail);
        out.push('\n');
    }

    let _ = writeln!(out, "# HELP {}_info Build information", prefix);
    let _ = writeln!(out, "# TYPE {}_info gauge", prefix);
    let _ = writeln!(out, "{}_info{{version=\"{}\"}} 1", prefix, env!("CARGO_PKG_VERSION"));
    out
}

/// GET /metrics
///
/// Returns Prometheus-format metrics
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        render(&state),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();
        metrics.inc_requests();
        metrics.inc_requests();
        metrics.inc_refresh_failures();
        metrics.record_aggregation(Duration::from_millis(250));

        let snapshot = metrics.get_metrics();
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.snapshot_refresh_failures_total, 1);
        assert_eq!(snapshot.aggregations_total, 1);
        assert_eq!(snapshot.last_aggregation_seconds, 0.25);
    }

    #[test]
    fn test_metric_block_format() {
        let mut out = String::new();
        metric(&mut out, "wmstats", "requests_total", "counter", "Total requests", 7);
        assert_eq!(
            out,
            "# HELP wmstats_requests_total Total requests\n# TYPE wmstats_requests_total counter\nwmstats_requests_total 7\n\n"
        );
    }
}
