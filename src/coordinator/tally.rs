//! Reduction of per-range outcomes into a scan result

use super::DispatchMode;
use crate::error::SessionError;
use crate::types::TokenRange;
use serde::Serialize;
use std::time::Duration;

/// A range that was never scanned successfully
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRange {
    /// The range
    pub range: TokenRange,
    /// Attempts made, including the first
    pub attempts: u32,
    /// Last error, rendered
    pub error: String,
}

impl FailedRange {
    /// Record `range` as failed after `attempts` attempts
    pub fn new(range: TokenRange, attempts: u32, error: &SessionError) -> Self {
        Self {
            range,
            attempts,
            error: error.to_string(),
        }
    }
}

/// Running totals of a scan, written only by the coordinator
///
/// Row counts are summed, so the order in which units complete has no
/// effect on the result.
#[derive(Debug, Default, Clone)]
pub struct ScanTally {
    rows: u64,
    ranges_scanned: u64,
    queries: u64,
    units: u64,
    retries: u64,
    failed: Vec<FailedRange>,
}

impl ScanTally {
    /// Record a successfully counted range
    pub fn record_rows(&mut self, rows: u64) {
        self.rows = self.rows.saturating_add(rows);
        self.ranges_scanned += 1;
        self.queries += 1;
    }

    /// Record a failed query attempt
    pub fn record_query_failure(&mut self) {
        self.queries += 1;
    }

    /// Record a completed unit
    pub fn record_unit(&mut self) {
        self.units += 1;
    }

    /// Record a range re-dispatch
    pub fn record_retry(&mut self) {
        self.retries += 1;
    }

    /// Record a range given up on
    pub fn record_unscanned(&mut self, failed: FailedRange) {
        self.failed.push(failed);
    }

    /// Rows counted so far
    pub fn total_rows(&self) -> u64 {
        self.rows
    }

    /// Ranges counted successfully so far
    pub fn ranges_scanned(&self) -> u64 {
        self.ranges_scanned
    }

    /// Seal the tally into a result
    pub fn finish(mut self, summary: ScanSummary) -> ScanResult {
        self.failed.sort_by_key(|f| f.range);
        ScanResult {
            total_rows: self.rows,
            elapsed: summary.elapsed,
            partitions: summary.partitions,
            ranges: summary.ranges,
            ranges_scanned: self.ranges_scanned,
            queries: self.queries,
            units: self.units,
            retries: self.retries,
            pool_size: summary.pool_size,
            dispatch: summary.dispatch,
            failed_ranges: self.failed,
        }
    }
}

/// Scan parameters carried into the result
#[derive(Debug, Clone, Copy)]
pub struct ScanSummary {
    /// Wall-clock duration
    pub elapsed: Duration,
    /// Logical partition count
    pub partitions: u64,
    /// Ranges planned (partitions × granularity)
    pub ranges: u64,
    /// Workers in the pool
    pub pool_size: usize,
    /// Dispatch strategy
    pub dispatch: DispatchMode,
}

/// Outcome of one scan
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    /// Rows counted across every scanned range
    pub total_rows: u64,
    /// Wall-clock duration, pool startup and shutdown included
    pub elapsed: Duration,
    /// Logical partition count
    pub partitions: u64,
    /// Ranges planned
    pub ranges: u64,
    /// Ranges counted successfully
    pub ranges_scanned: u64,
    /// Range queries issued, retries and failures included
    pub queries: u64,
    /// Units completed, retries included
    pub units: u64,
    /// Range re-dispatches
    pub retries: u64,
    /// Workers in the pool
    pub pool_size: usize,
    /// Dispatch strategy
    pub dispatch: DispatchMode,
    /// Ranges never scanned; empty unless partial results were requested
    pub failed_ranges: Vec<FailedRange>,
}

impl ScanResult {
    /// Whether every planned range was counted
    pub fn is_complete(&self) -> bool {
        self.failed_ranges.is_empty() && self.ranges_scanned == self.ranges
    }

    /// Range queries per second of wall-clock time
    pub fn queries_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.queries as f64 / secs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(ranges: u64) -> ScanSummary {
        ScanSummary {
            elapsed: Duration::from_secs(2),
            partitions: 1,
            ranges,
            pool_size: 1,
            dispatch: DispatchMode::PerRange,
        }
    }

    #[test]
    fn test_tally_sums_rows() {
        let mut tally = ScanTally::default();
        for rows in [3, 0, 7] {
            tally.record_rows(rows);
            tally.record_unit();
        }
        let result = tally.finish(summary(3));
        assert_eq!(result.total_rows, 10);
        assert!(result.is_complete());
        assert_eq!(result.queries_per_second(), 1.5);
    }

    #[test]
    fn test_partial_result_is_incomplete() {
        let mut tally = ScanTally::default();
        tally.record_rows(1);
        tally.record_query_failure();
        tally.record_unscanned(FailedRange::new(
            TokenRange::new_unchecked(5, 9),
            2,
            &SessionError::Query("overloaded".into()),
        ));
        let result = tally.finish(summary(2));
        assert!(!result.is_complete());
        assert_eq!(result.queries, 2);
        assert_eq!(result.failed_ranges[0].error, "Query error: overloaded");
    }

    #[test]
    fn test_zero_elapsed_throughput() {
        let mut s = summary(0);
        s.elapsed = Duration::ZERO;
        assert_eq!(ScanTally::default().finish(s).queries_per_second(), 0.0);
    }
}
