//! Default parallelism estimation
//!
//! When no partition count is given, one is derived from the cluster layout:
//!
//! ```text
//! partitions = nodes × cores_per_node × oversubscription
//! ```
//!
//! `cores_per_node` is a placeholder (2) rather than a measurement: the
//! driver exposes no per-node core count. `oversubscription` (3) offers each
//! core about three range queries so the cluster stays saturated despite
//! latency variance between ranges.
//!
//! This is independent of the coordinator's granularity, which splits each
//! logical partition further into query units.

use crate::error::ScanError;
use crate::session::ClusterTopology;
use std::sync::Arc;
use tracing::{debug, info};

/// Formula inputs for the default partition count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimationPolicy {
    /// Assumed cores per node
    pub cores_per_node: u64,
    /// Range queries offered per core
    pub oversubscription: u64,
}

impl EstimationPolicy {
    /// Cores assumed per node until a real capability query exists
    pub const PLACEHOLDER_CORES_PER_NODE: u64 = 2;

    /// Range queries offered per core
    pub const DEFAULT_OVERSUBSCRIPTION: u64 = 3;

    /// Partition count for a cluster of `nodes` nodes
    ///
    /// Saturates instead of overflowing; an oversized count is rejected later
    /// by the partitioner.
    pub fn partitions_for(&self, nodes: u64) -> u64 {
        nodes
            .saturating_mul(self.cores_per_node)
            .saturating_mul(self.oversubscription)
    }
}

impl Default for EstimationPolicy {
    fn default() -> Self {
        Self {
            cores_per_node: Self::PLACEHOLDER_CORES_PER_NODE,
            oversubscription: Self::DEFAULT_OVERSUBSCRIPTION,
        }
    }
}

/// Derives a default partition count from live topology
#[derive(Clone)]
pub struct ParallelismEstimator {
    topology: Arc<dyn ClusterTopology>,
    policy: EstimationPolicy,
    verbose: bool,
}

impl ParallelismEstimator {
    /// Create an estimator with the default policy
    pub fn new(topology: Arc<dyn ClusterTopology>) -> Self {
        Self {
            topology,
            policy: EstimationPolicy::default(),
            verbose: false,
        }
    }

    /// Use a custom estimation policy
    pub fn with_policy(mut self, policy: EstimationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Log topology figures at info level
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// The policy in use
    pub fn policy(&self) -> EstimationPolicy {
        self.policy
    }

    /// Estimate the default partition count
    ///
    /// # Errors
    ///
    /// `TopologyUnavailable` if the topology query fails, reports no nodes,
    /// or the policy yields zero partitions.
    pub async fn estimate_default_partition_count(&self) -> Result<u64, ScanError> {
        let nodes = self
            .topology
            .node_count()
            .await
            .map_err(|e| ScanError::TopologyUnavailable(e.to_string()))?;
        if nodes == 0 {
            return Err(ScanError::TopologyUnavailable(
                "cluster reported no nodes".to_string(),
            ));
        }

        let partitions = self.policy.partitions_for(nodes as u64);
        if partitions == 0 {
            return Err(ScanError::TopologyUnavailable(
                "estimation policy produced zero partitions".to_string(),
            ));
        }

        if self.verbose {
            info!(
                nodes,
                cores_per_node = self.policy.cores_per_node,
                oversubscription = self.policy.oversubscription,
                partitions,
                "Estimated default partition count"
            );
        } else {
            debug!(nodes, partitions, "Estimated default partition count");
        }

        Ok(partitions)
    }
}
