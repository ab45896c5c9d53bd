//! Scan coordination
//!
//! The [`ScanCoordinator`] turns a partition count into query units, feeds
//! them through a [`pool::WorkerPool`], applies the failure policy to every
//! range outcome and sums row counts into a [`ScanResult`].
//!
//! # Architecture
//!
//! ```text
//! partitions ──▶ × granularity ──▶ Subranges ──▶ WorkUnits ──▶ WorkerPool
//!                                                                 │
//!        ScanResult ◀── ScanTally ◀── failure policy ◀── UnitReport┘
//!                                          │
//!                                          └── retry units (re-queued)
//! ```
//!
//! Only the coordinator task writes to the tally, so the reduction needs no
//! locking and does not depend on completion order.

pub mod pool;
pub mod retry;
pub mod tally;

pub use retry::{FailureMode, FailurePolicy, RetryPolicy};
pub use tally::{FailedRange, ScanResult, ScanSummary, ScanTally};

use crate::error::{Error, ScanError};
use crate::estimator::{EstimationPolicy, ParallelismEstimator};
use crate::metrics;
use crate::partition::{RangePartitioner, Subranges};
use crate::session::{ClusterTopology, SessionFactory};
use crate::types::{TokenRange, TokenSpace};
use pool::{UnitReport, WorkUnit, WorkerEvent, WorkerPool, WorkerSettings};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How query units are formed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// One range per unit
    PerRange,
    /// Up to `concurrency` ranges per unit, queried concurrently on one session
    Batched {
        /// Ranges per unit
        concurrency: usize,
    },
}

impl DispatchMode {
    /// Ranges carried by each unit
    pub fn batch_size(&self) -> usize {
        match self {
            DispatchMode::PerRange => 1,
            DispatchMode::Batched { concurrency } => *concurrency,
        }
    }
}

/// Scan configuration
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Token domain to scan
    pub space: TokenSpace,
    /// Query units per logical partition
    pub granularity: u64,
    /// Unit formation
    pub dispatch: DispatchMode,
    /// Per-range query timeout
    pub unit_timeout: Option<Duration>,
    /// Retry budget and exhausted-range handling
    pub failure: FailurePolicy,
    /// Default partition count formula
    pub estimation: EstimationPolicy,
    /// Log every range query and unit
    pub verbose: bool,
}

impl ScanConfig {
    /// Query units per logical partition
    pub const DEFAULT_GRANULARITY: u64 = 100;

    /// Set the token domain
    pub fn space(mut self, space: TokenSpace) -> Self {
        self.space = space;
        self
    }

    /// Set the granularity multiplier
    pub fn granularity(mut self, granularity: u64) -> Self {
        self.granularity = granularity;
        self
    }

    /// Set the dispatch mode
    pub fn dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Set the per-range timeout; `None` disables it
    pub fn unit_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.unit_timeout = timeout;
        self
    }

    /// Set the failure policy
    pub fn failure_policy(mut self, failure: FailurePolicy) -> Self {
        self.failure = failure;
        self
    }

    /// Set the estimation policy
    pub fn estimation_policy(mut self, estimation: EstimationPolicy) -> Self {
        self.estimation = estimation;
        self
    }

    /// Enable verbose logging
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            space: TokenSpace::FULL,
            granularity: Self::DEFAULT_GRANULARITY,
            dispatch: DispatchMode::PerRange,
            unit_timeout: Some(Duration::from_secs(30)),
            failure: FailurePolicy::default(),
            estimation: EstimationPolicy::default(),
            verbose: false,
        }
    }
}

/// Query units for one scan, produced lazily
#[derive(Debug, Clone)]
pub struct ScanPlan {
    partitions: u64,
    ranges: u64,
    batch_size: usize,
    subranges: Subranges,
}

impl ScanPlan {
    /// Logical partition count
    pub fn partitions(&self) -> u64 {
        self.partitions
    }

    /// Ranges to query
    pub fn range_count(&self) -> u64 {
        self.ranges
    }

    /// Units the ranges are grouped into
    pub fn unit_count(&self) -> u64 {
        self.ranges.div_ceil(self.batch_size as u64)
    }

    /// Iterate over the units, numbered from 0
    pub fn units(self) -> PlannedUnits {
        PlannedUnits {
            subranges: self.subranges,
            batch_size: self.batch_size,
            next_id: 0,
        }
    }
}

/// Iterator over the units of a [`ScanPlan`]
#[derive(Debug, Clone)]
pub struct PlannedUnits {
    subranges: Subranges,
    batch_size: usize,
    next_id: u64,
}

impl Iterator for PlannedUnits {
    type Item = WorkUnit;

    fn next(&mut self) -> Option<WorkUnit> {
        let ranges: Vec<TokenRange> = self.subranges.by_ref().take(self.batch_size).collect();
        if ranges.is_empty() {
            return None;
        }
        let unit = WorkUnit::new(self.next_id, ranges);
        self.next_id += 1;
        Some(unit)
    }
}

/// Drives a full scan over a worker pool
pub struct ScanCoordinator<F: SessionFactory> {
    factory: Arc<F>,
    topology: Option<Arc<dyn ClusterTopology>>,
    config: ScanConfig,
}

impl<F: SessionFactory> ScanCoordinator<F> {
    /// Create a coordinator; the partition count must then be given explicitly
    pub fn new(factory: Arc<F>, config: ScanConfig) -> Self {
        Self {
            factory,
            topology: None,
            config,
        }
    }

    /// Topology used to estimate a default partition count
    pub fn with_topology(mut self, topology: Arc<dyn ClusterTopology>) -> Self {
        self.topology = Some(topology);
        self
    }

    /// The scan configuration
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Use `requested`, or estimate a count from topology
    pub async fn resolve_partitions(&self, requested: Option<u64>) -> Result<u64, ScanError> {
        if let Some(n) = requested {
            return Ok(n);
        }
        let topology = self.topology.as_ref().ok_or_else(|| {
            ScanError::TopologyUnavailable("no topology source configured".to_string())
        })?;
        ParallelismEstimator::new(Arc::clone(topology))
            .with_policy(self.config.estimation)
            .with_verbose(self.config.verbose)
            .estimate_default_partition_count()
            .await
    }

    /// Split the token domain for `partitions` logical partitions
    ///
    /// Each partition becomes `granularity` ranges. When that exceeds the
    /// domain size the range count is capped at one token per range.
    ///
    /// # Errors
    ///
    /// `InvalidPartitionCount` if `partitions` is zero or exceeds the domain.
    pub fn plan(&self, partitions: u64) -> Result<ScanPlan, ScanError> {
        let domain_size = self.config.space.size();
        if partitions == 0 || partitions as u128 > domain_size {
            return Err(ScanError::InvalidPartitionCount {
                requested: partitions as u128,
                domain_size,
            });
        }

        let wanted = partitions as u128 * self.config.granularity.max(1) as u128;
        let ranges = wanted.min(domain_size) as u64;
        if (ranges as u128) < wanted {
            debug!(wanted, ranges, "Range count capped at domain size");
        }

        let subranges = RangePartitioner::new(self.config.space).subranges(ranges)?;
        Ok(ScanPlan {
            partitions,
            ranges,
            batch_size: self.config.dispatch.batch_size().max(1),
            subranges,
        })
    }

    /// Count every row in the token domain
    ///
    /// `partitions` of `None` estimates a count from topology. The pool of
    /// `pool_size` workers is started before any range is queried and every
    /// session is closed before this returns, on success and on failure.
    pub async fn run_scan(&self, partitions: Option<u64>, pool_size: usize) -> crate::Result<ScanResult> {
        self.run_scan_until(partitions, pool_size, std::future::pending())
            .await
    }

    /// Like [`run_scan`](Self::run_scan), but stops early once `shutdown`
    /// completes
    ///
    /// On shutdown the workers are cancelled, their in-flight units finish
    /// (bounded by the per-range timeout) and every session is closed before
    /// `ScanError::Cancelled` is returned.
    pub async fn run_scan_until<S>(
        &self,
        partitions: Option<u64>,
        pool_size: usize,
        shutdown: S,
    ) -> crate::Result<ScanResult>
    where
        S: Future<Output = ()>,
    {
        if pool_size == 0 {
            return Err(Error::Configuration("pool size must be at least 1".to_string()));
        }
        if self.config.granularity == 0 {
            return Err(Error::Configuration("granularity must be at least 1".to_string()));
        }
        if self.config.dispatch.batch_size() == 0 {
            return Err(Error::Configuration(
                "batch concurrency must be at least 1".to_string(),
            ));
        }

        let start = Instant::now();
        let partitions = self.resolve_partitions(partitions).await?;
        let plan = self.plan(partitions)?;
        let ranges = plan.range_count();
        let planned_units = plan.unit_count();

        info!(
            partitions,
            ranges,
            units = planned_units,
            pool_size,
            dispatch = ?self.config.dispatch,
            "Starting token ring scan"
        );

        let result = self.execute(plan, pool_size, shutdown).await;
        metrics::record_scan(result.is_ok());

        let tally = result?;
        let scan = tally.finish(ScanSummary {
            elapsed: start.elapsed(),
            partitions,
            ranges,
            pool_size,
            dispatch: self.config.dispatch,
        });

        info!(
            rows = scan.total_rows,
            elapsed_ms = scan.elapsed.as_millis(),
            queries = scan.queries,
            retries = scan.retries,
            unscanned = scan.failed_ranges.len(),
            "Scan complete"
        );
        Ok(scan)
    }

    async fn execute<S>(
        &self,
        plan: ScanPlan,
        pool_size: usize,
        shutdown: S,
    ) -> Result<ScanTally, ScanError>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let settings = WorkerSettings {
            timeout: self.config.unit_timeout,
            verbose: self.config.verbose,
        };
        let mut pool = WorkerPool::start(Arc::clone(&self.factory), pool_size, settings).await?;

        let planned_units = plan.unit_count();
        let feeder = match pool.sender() {
            Some(tx) => tokio::spawn(feed_units(tx, plan.units())),
            None => {
                let _ = pool.shutdown().await;
                return Err(ScanError::PoolClosed {
                    outstanding: planned_units as usize,
                });
            },
        };

        let mut tally = ScanTally::default();
        let mut outstanding = planned_units;
        let mut next_retry_id = planned_units;

        while outstanding > 0 {
            let event = tokio::select! {
                event = pool.next_event() => Some(event),
                _ = &mut shutdown => None,
            };
            let Some(event) = event else {
                warn!(outstanding, "Scan interrupted, stopping workers");
                stop(pool, feeder).await;
                return Err(ScanError::Cancelled {
                    outstanding: outstanding as usize,
                });
            };
            let report = match event {
                Some(WorkerEvent::Completed(report)) => report,
                Some(WorkerEvent::Panicked { worker, message }) => {
                    warn!(worker, %message, "Worker panicked, aborting scan");
                    stop(pool, feeder).await;
                    return Err(ScanError::WorkerPanicked(message));
                },
                None => {
                    stop(pool, feeder).await;
                    return Err(ScanError::PoolClosed {
                        outstanding: outstanding as usize,
                    });
                },
            };
            outstanding -= 1;
            tally.record_unit();

            if self.config.verbose {
                info!(
                    unit = report.unit_id,
                    worker = report.worker,
                    ranges = report.outcomes.len(),
                    "Unit complete"
                );
            }

            let retries = match self.apply_outcomes(report, &mut tally) {
                Ok(retries) => retries,
                Err(e) => {
                    stop(pool, feeder).await;
                    return Err(e);
                },
            };

            for (range, retries_used) in retries {
                let delay = self.config.failure.retry.delay_for_attempt(retries_used - 1);
                let unit = WorkUnit::retry(next_retry_id, range, retries_used, delay);
                next_retry_id += 1;
                tally.record_retry();
                metrics::record_retry();
                debug!(%range, retries_used, delay_ms = delay.as_millis(), "Re-dispatching range");

                if let Err(e) = pool.dispatch(unit).await {
                    stop(pool, feeder).await;
                    return Err(e);
                }
                outstanding += 1;
            }
        }

        if let Err(e) = feeder.await {
            warn!(error = %e, "Unit feeder stopped abnormally");
        }
        pool.shutdown().await?;
        Ok(tally)
    }

    /// Fold one unit's outcomes into the tally
    ///
    /// Returns the ranges to re-dispatch with their new retry count, or the
    /// error that ends the scan.
    fn apply_outcomes(
        &self,
        report: UnitReport,
        tally: &mut ScanTally,
    ) -> Result<Vec<(TokenRange, u32)>, ScanError> {
        let policy = &self.config.failure;
        let mut retries = Vec::new();

        for (range, outcome) in report.outcomes {
            let err = match outcome {
                Ok(rows) => {
                    tally.record_rows(rows);
                    continue;
                },
                Err(e) => e,
            };
            tally.record_query_failure();

            if err.is_retriable() && policy.retry.should_retry(report.retries_used) {
                retries.push((range, report.retries_used + 1));
                continue;
            }

            let attempts = report.retries_used + 1;
            match policy.mode {
                FailureMode::Abort => {
                    return Err(ScanError::RangeQueryFailure {
                        range,
                        attempts,
                        source: err,
                    });
                },
                FailureMode::ReportPartial => {
                    warn!(%range, attempts, error = %err, "Range left un-scanned");
                    tally.record_unscanned(FailedRange::new(range, attempts, &err));
                },
            }
        }

        Ok(retries)
    }
}

async fn feed_units(tx: mpsc::Sender<WorkUnit>, units: PlannedUnits) {
    for unit in units {
        if tx.send(unit).await.is_err() {
            break;
        }
    }
}

/// Cancel the scan and wait until every session is closed
async fn stop(pool: WorkerPool, feeder: JoinHandle<()>) {
    pool.cancel();
    feeder.abort();
    let _ = feeder.await;
    if let Err(e) = pool.shutdown().await {
        warn!(error = %e, "Worker pool did not shut down cleanly");
    }
}
