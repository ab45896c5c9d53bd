//! Error types for the scanner

use crate::types::TokenRange;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the scanner
#[derive(Error, Debug)]
pub enum Error {
    /// Scan planning or execution error
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    /// Session/backend error outside of a scan
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// General error
    #[error("{0}")]
    General(String),
}

/// Errors raised while planning or running a scan
#[derive(Error, Debug)]
pub enum ScanError {
    /// Requested partition count is zero or larger than the token domain
    ///
    /// Raised before any work is dispatched.
    #[error("Invalid partition count {requested}: must be in [1, {domain_size}]")]
    InvalidPartitionCount {
        /// The partition (or query unit) count that was requested
        requested: u128,
        /// Number of tokens in the domain being partitioned
        domain_size: u128,
    },

    /// Cluster topology could not be read to estimate a partition count
    #[error("Cluster topology unavailable: {0}")]
    TopologyUnavailable(String),

    /// A bounded range query failed and the failure policy gave up on it
    #[error("Range query failed for {range} after {attempts} attempt(s): {source}")]
    RangeQueryFailure {
        /// The range that could not be scanned
        range: TokenRange,
        /// Number of attempts made, including the first
        attempts: u32,
        /// Last error reported by the session
        #[source]
        source: SessionError,
    },

    /// A worker could not establish its session at startup
    #[error("Worker {worker} failed to initialize: {source}")]
    WorkerInitializationFailure {
        /// Index of the worker within the pool
        worker: usize,
        /// Connection error reported by the session factory
        #[source]
        source: SessionError,
    },

    /// A worker task panicked
    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),

    /// The worker pool stopped before all units reported back
    #[error("Worker pool closed with {outstanding} unit(s) outstanding")]
    PoolClosed {
        /// Units dispatched but never reported
        outstanding: usize,
    },

    /// The scan was stopped from outside before it finished
    #[error("Scan cancelled with {outstanding} unit(s) outstanding")]
    Cancelled {
        /// Units not yet reported when the scan stopped
        outstanding: usize,
    },

    /// Invalid token range bounds
    #[error("Invalid token range: lower {lower} > upper {upper}")]
    InvalidRange {
        /// Lower bound
        lower: i64,
        /// Upper bound
        upper: i64,
    },
}

/// Errors reported by a database session or topology backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Connection could not be established or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution failed
    #[error("Query error: {0}")]
    Query(String),

    /// Query did not complete within the per-range timeout
    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    /// Topology metadata could not be read
    #[error("Topology error: {0}")]
    Topology(String),
}

impl SessionError {
    /// Whether a retry has any chance of succeeding
    ///
    /// Connection drops and timeouts are transient; query errors usually are
    /// too on a busy cluster, so only topology errors are treated as permanent.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, SessionError::Topology(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_error_converts_into_error() {
        let err: Error = ScanError::TopologyUnavailable("no hosts".to_string()).into();
        assert!(matches!(err, Error::Scan(ScanError::TopologyUnavailable(_))));
        assert_eq!(
            err.to_string(),
            "Scan error: Cluster topology unavailable: no hosts"
        );
    }

    #[test]
    fn test_range_failure_message_names_range() {
        let err = ScanError::RangeQueryFailure {
            range: TokenRange::new_unchecked(-10, 10),
            attempts: 3,
            source: SessionError::Timeout(Duration::from_secs(2)),
        };
        let msg = err.to_string();
        assert!(msg.contains("[-10, 10]"));
        assert!(msg.contains("3 attempt(s)"));
    }

    #[test]
    fn test_retriable_classification() {
        assert!(SessionError::Connection("reset".into()).is_retriable());
        assert!(SessionError::Timeout(Duration::from_millis(5)).is_retriable());
        assert!(!SessionError::Topology("no metadata".into()).is_retriable());
    }
}
