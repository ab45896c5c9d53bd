//! Token Scan - parallel full-table scans over a Cassandra/Scylla token ring
//!
//! This library counts every row of a table by splitting the partitioner's
//! token ring into contiguous ranges and querying them concurrently:
//! - Exact, gap-free partitioning of the signed 64-bit token domain
//! - Default parallelism derived from cluster topology
//! - Fixed-size worker pool, one long-lived session per worker
//! - Per-range timeouts, bounded retries and optional partial results
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use token_scan::session::MemoryCluster;
//! use token_scan::{ScanConfig, ScanCoordinator};
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! rt.block_on(async {
//!     let cluster = MemoryCluster::evenly_spaced(1_000);
//!     let coordinator = ScanCoordinator::new(Arc::new(cluster), ScanConfig::default());
//!     let result = coordinator.run_scan(Some(4), 2).await.unwrap();
//!     assert_eq!(result.total_rows, 1_000);
//! });
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod partition;
pub mod types;

/// Prometheus metrics for range queries and scans
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Database session traits and backends
pub mod session;

/// Default partition count from cluster topology
pub mod estimator;

/// Per-worker range query execution
pub mod executor;

/// Worker pool, failure policy and scan orchestration
pub mod coordinator;

// Re-export main types
pub use coordinator::{DispatchMode, FailureMode, FailurePolicy, ScanConfig, ScanCoordinator, ScanResult};
pub use error::{Error, Result, ScanError, SessionError};
pub use partition::RangePartitioner;
pub use types::{TokenRange, TokenSpace};
