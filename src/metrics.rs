//! Metrics and telemetry for token scans
//!
//! Prometheus metrics covering range query throughput, latency, failures and
//! worker pool occupancy.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};

lazy_static! {
    // === Throughput Counters ===

    /// Range queries by outcome
    pub static ref RANGE_QUERIES_TOTAL: CounterVec = register_counter_vec!(
        "token_scan_range_queries_total",
        "Total bounded range queries executed",
        &["status"]
    ).unwrap();

    /// Rows counted across all range queries
    pub static ref ROWS_SCANNED_TOTAL: Counter = register_counter!(
        "token_scan_rows_scanned_total",
        "Total rows streamed and counted"
    ).unwrap();

    /// Ranges re-dispatched after a failure
    pub static ref RANGE_RETRIES_TOTAL: Counter = register_counter!(
        "token_scan_range_retries_total",
        "Total range re-dispatches after a failure"
    ).unwrap();

    /// Scans by outcome
    pub static ref SCANS_TOTAL: CounterVec = register_counter_vec!(
        "token_scan_scans_total",
        "Total scans run",
        &["status"]
    ).unwrap();

    // === Latency Histograms ===

    /// Range query duration
    pub static ref RANGE_QUERY_DURATION: HistogramVec = register_histogram_vec!(
        "token_scan_range_query_duration_seconds",
        "Range query latency in seconds",
        &["status"],
        vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
    ).unwrap();

    // === Pool Gauges ===

    /// Workers currently holding a session
    pub static ref ACTIVE_WORKERS: Gauge = register_gauge!(
        "token_scan_active_workers",
        "Number of workers with an open session"
    ).unwrap();
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record one range query
#[inline]
pub fn record_range_query(duration_secs: f64, rows: Option<u64>) {
    let status = match rows {
        Some(rows) => {
            ROWS_SCANNED_TOTAL.inc_by(rows as f64);
            "success"
        },
        None => "error",
    };

    RANGE_QUERIES_TOTAL.with_label_values(&[status]).inc();
    RANGE_QUERY_DURATION
        .with_label_values(&[status])
        .observe(duration_secs);
}

/// Record a range re-dispatch
#[inline]
pub fn record_retry() {
    RANGE_RETRIES_TOTAL.inc();
}

/// Record a finished scan
#[inline]
pub fn record_scan(success: bool) {
    let status = if success { "success" } else { "error" };
    SCANS_TOTAL.with_label_values(&[status]).inc();
}

/// Track a worker acquiring (`+1`) or releasing (`-1`) its session
#[inline]
pub fn worker_session_delta(delta: i64) {
    ACTIVE_WORKERS.add(delta as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_contains_scan_metrics() {
        record_range_query(0.002, Some(7));
        record_range_query(0.5, None);
        record_retry();

        let text = gather_metrics().unwrap();
        assert!(text.contains("token_scan_range_queries_total"));
        assert!(text.contains("token_scan_rows_scanned_total"));
        assert!(text.contains("token_scan_range_retries_total"));
    }
}
