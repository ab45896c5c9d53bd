//! Bounded range query execution
//!
//! A [`RangeQueryExecutor`] wraps one worker's session. It runs one
//! token-restricted query per range, applies the per-range timeout and
//! records metrics. It never retries: failures go back to the coordinator,
//! which owns the failure policy.

use crate::error::SessionError;
use crate::metrics;
use crate::session::Session;
use crate::types::TokenRange;
use futures::future::join_all;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Per-worker range query runner
pub struct RangeQueryExecutor<S: Session> {
    session: S,
    worker: usize,
    timeout: Option<Duration>,
    verbose: bool,
}

impl<S: Session> RangeQueryExecutor<S> {
    /// Wrap a connected session
    pub fn new(session: S, worker: usize) -> Self {
        Self {
            session,
            worker,
            timeout: None,
            verbose: false,
        }
    }

    /// Fail any single range query that runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Log every query and its row count
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Index of the owning worker
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// The underlying session
    pub fn session(&self) -> &S {
        &self.session
    }

    /// Count the rows in one range
    pub async fn execute(&self, range: TokenRange) -> Result<u64, SessionError> {
        if self.verbose {
            debug!(worker = self.worker, %range, "Executing range query");
        }

        let start = Instant::now();
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.session.count_range(range))
                .await
                .unwrap_or(Err(SessionError::Timeout(limit))),
            None => self.session.count_range(range).await,
        };
        let elapsed = start.elapsed();

        metrics::record_range_query(elapsed.as_secs_f64(), result.as_ref().ok().copied());

        match &result {
            Ok(rows) if self.verbose => {
                debug!(
                    worker = self.worker,
                    %range,
                    rows,
                    elapsed_ms = elapsed.as_millis(),
                    "Range query complete"
                );
            },
            Ok(_) => {},
            Err(e) => {
                warn!(worker = self.worker, %range, error = %e, "Range query failed");
            },
        }

        result
    }

    /// Count the rows in each range, issuing all queries concurrently
    ///
    /// The output has one entry per input range, in input order.
    pub async fn execute_batch(&self, ranges: &[TokenRange]) -> Vec<Result<u64, SessionError>> {
        join_all(ranges.iter().map(|range| self.execute(*range))).await
    }

    /// Close the session
    pub async fn close(self) -> Result<(), SessionError> {
        self.session.close().await
    }
}
