//! In-memory cluster backend
//!
//! Holds a sorted list of row tokens and answers range counts by binary
//! search. Latency, query failures, stalls and connection failures can be
//! injected, which makes it the backend of choice for exercising the
//! coordinator without a live cluster.
//!
//! # Example
//!
//! ```rust
//! use token_scan::session::{MemoryCluster, Session, SessionFactory};
//! use token_scan::types::TokenRange;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cluster = MemoryCluster::new([-10, 0, 10, 20]);
//! let session = cluster.connect().await?;
//!
//! let rows = session.count_range(TokenRange::new(0, 15)?).await?;
//! assert_eq!(rows, 2);
//! # Ok(())
//! # }
//! ```

use super::{ClusterTopology, Session, SessionFactory};
use crate::error::SessionError;
use crate::types::{TokenRange, TOKEN_MIN};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// What an injected fault does when it fires
#[derive(Debug, Clone)]
enum FaultKind {
    Fail(SessionError),
    Stall(Duration),
}

/// Fault armed on every range that contains `token`
#[derive(Debug, Clone)]
struct Fault {
    token: i64,
    remaining: u32,
    kind: FaultKind,
}

/// Counters and fault state shared by every clone and session
#[derive(Debug, Default)]
struct SharedState {
    faults: Mutex<Vec<Fault>>,
    connect_failures: AtomicUsize,
    sessions_opened: AtomicUsize,
    sessions_closed: AtomicUsize,
    queries: AtomicU64,
}

/// In-memory table keyed by partition token
#[derive(Debug, Clone)]
pub struct MemoryCluster {
    tokens: Arc<Vec<i64>>,
    nodes: usize,
    latency: Duration,
    state: Arc<SharedState>,
}

impl MemoryCluster {
    /// Create a cluster holding one row per token (duplicates allowed)
    pub fn new(tokens: impl IntoIterator<Item = i64>) -> Self {
        let mut tokens: Vec<i64> = tokens.into_iter().collect();
        tokens.sort_unstable();
        Self {
            tokens: Arc::new(tokens),
            nodes: 1,
            latency: Duration::ZERO,
            state: Arc::new(SharedState::default()),
        }
    }

    /// Create a cluster with `rows` tokens spread evenly over the ring
    pub fn evenly_spaced(rows: u64) -> Self {
        if rows == 0 {
            return Self::new(std::iter::empty());
        }
        let step = (u64::MAX / rows) as i128;
        Self::new((0..rows).map(|i| (TOKEN_MIN as i128 + i as i128 * step) as i64))
    }

    /// Set the node count reported to the parallelism estimator
    pub fn with_nodes(mut self, nodes: usize) -> Self {
        self.nodes = nodes;
        self
    }

    /// Delay every range query by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next `times` queries whose range contains `token`
    pub fn fail_range_containing(&self, token: i64, times: u32, error: SessionError) {
        self.state.faults.lock().push(Fault {
            token,
            remaining: times,
            kind: FaultKind::Fail(error),
        });
    }

    /// Stall the next `times` queries whose range contains `token`
    pub fn stall_range_containing(&self, token: i64, times: u32, stall: Duration) {
        self.state.faults.lock().push(Fault {
            token,
            remaining: times,
            kind: FaultKind::Stall(stall),
        });
    }

    /// Refuse the next `count` connection attempts
    pub fn fail_next_connects(&self, count: usize) {
        self.state.connect_failures.store(count, Ordering::SeqCst);
    }

    /// Number of rows stored
    pub fn row_count(&self) -> u64 {
        self.tokens.len() as u64
    }

    /// Rows whose token lies in `range`
    pub fn rows_in(&self, range: TokenRange) -> u64 {
        let start = self.tokens.partition_point(|t| *t < range.lower());
        let end = self.tokens.partition_point(|t| *t <= range.upper());
        (end - start) as u64
    }

    /// Sessions successfully opened so far
    pub fn sessions_opened(&self) -> usize {
        self.state.sessions_opened.load(Ordering::SeqCst)
    }

    /// Sessions closed so far
    pub fn sessions_closed(&self) -> usize {
        self.state.sessions_closed.load(Ordering::SeqCst)
    }

    /// Range queries executed so far, failed ones included
    pub fn queries_executed(&self) -> u64 {
        self.state.queries.load(Ordering::SeqCst)
    }

    /// Take the first armed fault touching `range`, if any
    fn trigger_fault(&self, range: TokenRange) -> Option<FaultKind> {
        let mut faults = self.state.faults.lock();
        let fault = faults
            .iter_mut()
            .find(|f| f.remaining > 0 && range.contains(f.token))?;
        fault.remaining -= 1;
        Some(fault.kind.clone())
    }
}

#[async_trait]
impl SessionFactory for MemoryCluster {
    type Session = MemorySession;

    async fn connect(&self) -> Result<MemorySession, SessionError> {
        let refused = self
            .state
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(SessionError::Connection(
                "connection refused by in-memory cluster".to_string(),
            ));
        }

        let id = self.state.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(MemorySession {
            id,
            cluster: self.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ClusterTopology for MemoryCluster {
    async fn node_count(&self) -> Result<usize, SessionError> {
        if self.nodes == 0 {
            return Err(SessionError::Topology("no hosts known".to_string()));
        }
        Ok(self.nodes)
    }
}

/// Session over a [`MemoryCluster`]
#[derive(Debug)]
pub struct MemorySession {
    id: usize,
    cluster: MemoryCluster,
    closed: AtomicBool,
}

impl MemorySession {
    /// Sequence number of this session within its cluster
    pub fn id(&self) -> usize {
        self.id
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn count_range(&self, range: TokenRange) -> Result<u64, SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Connection("session closed".to_string()));
        }
        self.cluster.state.queries.fetch_add(1, Ordering::SeqCst);

        if !self.cluster.latency.is_zero() {
            tokio::time::sleep(self.cluster.latency).await;
        }

        match self.cluster.trigger_fault(range) {
            Some(FaultKind::Fail(e)) => return Err(e),
            Some(FaultKind::Stall(d)) => tokio::time::sleep(d).await,
            None => {},
        }

        let rows = self.cluster.rows_in(range);
        trace!(session = self.id, %range, rows, "In-memory range counted");
        Ok(rows)
    }

    async fn close(&self) -> Result<(), SessionError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.cluster
                .state
                .sessions_closed
                .fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TOKEN_MAX;

    #[tokio::test]
    async fn test_counts_inclusive_bounds() {
        let cluster = MemoryCluster::new([5, 1, 3, 3, 9]);
        let session = cluster.connect().await.unwrap();

        assert_eq!(session.count_range(TokenRange::new_unchecked(3, 5)).await.unwrap(), 3);
        assert_eq!(session.count_range(TokenRange::new_unchecked(6, 8)).await.unwrap(), 0);
        assert_eq!(
            session
                .count_range(TokenRange::new_unchecked(TOKEN_MIN, TOKEN_MAX))
                .await
                .unwrap(),
            5
        );
        assert_eq!(cluster.queries_executed(), 3);
    }

    #[tokio::test]
    async fn test_fault_fires_limited_times() {
        let cluster = MemoryCluster::new([0]);
        cluster.fail_range_containing(0, 1, SessionError::Query("overloaded".into()));
        let session = cluster.connect().await.unwrap();
        let range = TokenRange::new_unchecked(-1, 1);

        assert!(session.count_range(range).await.is_err());
        assert_eq!(session.count_range(range).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_connect_failures_and_close_accounting() {
        let cluster = MemoryCluster::new([]);
        cluster.fail_next_connects(1);
        assert!(cluster.connect().await.is_err());

        let session = cluster.connect().await.unwrap();
        assert_eq!(cluster.sessions_opened(), 1);
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(cluster.sessions_closed(), 1);
        assert!(session.count_range(TokenRange::new_unchecked(0, 1)).await.is_err());
    }

    #[tokio::test]
    async fn test_topology() {
        assert_eq!(MemoryCluster::new([]).with_nodes(3).node_count().await.unwrap(), 3);
        assert!(MemoryCluster::new([]).with_nodes(0).node_count().await.is_err());
    }

    #[test]
    fn test_evenly_spaced_stays_on_ring() {
        let cluster = MemoryCluster::evenly_spaced(1000);
        assert_eq!(cluster.row_count(), 1000);
        assert_eq!(
            cluster.rows_in(TokenRange::new_unchecked(TOKEN_MIN, TOKEN_MAX)),
            1000
        );
    }
}
