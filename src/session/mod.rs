//! Database session abstraction
//!
//! The scanner only needs three capabilities from a cluster:
//!
//! ```text
//! SessionFactory::connect()    → one keyspace-bound Session per worker
//! Session::count_range(range)  → rows whose token falls in [lower, upper]
//! ClusterTopology::node_count  → live nodes, for the default parallelism
//! ```
//!
//! # Backends
//!
//! - [`memory::MemoryCluster`]: in-process token table with latency and
//!   failure injection, used for tests, benchmarks and dry runs
//! - `scylla::ScyllaConnector` (feature `scylla`): Scylla/Cassandra driver

pub mod memory;
pub mod query;

#[cfg(feature = "scylla")]
pub mod scylla;

use crate::error::SessionError;
use crate::types::TokenRange;
use async_trait::async_trait;

pub use memory::{MemoryCluster, MemorySession};
pub use query::RangeQuery;

#[cfg(feature = "scylla")]
pub use self::scylla::{ScyllaConnector, ScyllaSession};

/// A connected, keyspace-bound database session
///
/// Implementations must allow concurrent calls through `&self` so a worker can
/// issue a whole batch of range queries at once.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Count rows whose partition token lies in `range` (bounds inclusive)
    ///
    /// Rows must be consumed as a stream, never buffered: a single range can
    /// hold an unbounded number of rows.
    async fn count_range(&self, range: TokenRange) -> Result<u64, SessionError>;

    /// Release the session
    ///
    /// Called once when the owning worker stops.
    async fn close(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Creates sessions; called once per worker at pool startup
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    /// Session type produced by this factory
    type Session: Session;

    /// Establish a new session
    async fn connect(&self) -> Result<Self::Session, SessionError>;
}

/// Read-only view of the cluster layout
#[async_trait]
pub trait ClusterTopology: Send + Sync {
    /// Number of nodes currently known in the cluster
    async fn node_count(&self) -> Result<usize, SessionError>;
}
