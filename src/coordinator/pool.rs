//! Fixed-size worker pool with per-worker sessions
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  WorkUnit   ┌──────────────────────────┐  WorkerEvent  ┌─────────────┐
//! │ feeder task  │────────────▶│ worker 0 (own session)   │──────────────▶│ coordinator │
//! │ + retries    │  bounded    │ worker 1 (own session)   │  unbounded    │ (tally)     │
//! └──────────────┘  queue      │ ...                      │               └─────────────┘
//!                              └──────────────────────────┘
//! ```
//!
//! Every worker connects exactly once when the pool starts and keeps its
//! session until the job queue closes or the scan is cancelled, then closes
//! it. Workers share only the job queue and the cancellation flag.

use crate::error::{ScanError, SessionError};
use crate::executor::RangeQueryExecutor;
use crate::metrics;
use crate::session::{Session, SessionFactory};
use crate::types::TokenRange;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Smallest piece of work handed to a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// Sequence number, unique within a scan
    pub id: u64,
    /// Ranges to query; more than one only in batched dispatch
    pub ranges: Vec<TokenRange>,
    /// Retries already spent on these ranges
    pub retries_used: u32,
    /// Backoff to wait before executing
    pub delay: Duration,
}

impl WorkUnit {
    /// A first-attempt unit
    pub fn new(id: u64, ranges: Vec<TokenRange>) -> Self {
        Self {
            id,
            ranges,
            retries_used: 0,
            delay: Duration::ZERO,
        }
    }

    /// A single-range re-dispatch
    pub fn retry(id: u64, range: TokenRange, retries_used: u32, delay: Duration) -> Self {
        Self {
            id,
            ranges: vec![range],
            retries_used,
            delay,
        }
    }
}

/// Outcome of one unit, one entry per range in unit order
#[derive(Debug)]
pub struct UnitReport {
    /// Unit sequence number
    pub unit_id: u64,
    /// Worker that executed the unit
    pub worker: usize,
    /// Retries spent before this execution
    pub retries_used: u32,
    /// Per-range row counts or errors
    pub outcomes: Vec<(TokenRange, Result<u64, SessionError>)>,
}

/// Messages from workers to the coordinator
#[derive(Debug)]
pub enum WorkerEvent {
    /// A unit finished (successfully or not)
    Completed(UnitReport),
    /// A worker panicked while executing a unit and stopped
    Panicked {
        /// Worker index
        worker: usize,
        /// Panic message, if it was a string
        message: String,
    },
}

/// Settings applied to every worker's executor
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerSettings {
    /// Per-range query timeout
    pub timeout: Option<Duration>,
    /// Log every range query
    pub verbose: bool,
}

/// Running pool of workers
pub struct WorkerPool {
    job_tx: Option<mpsc::Sender<WorkUnit>>,
    event_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    workers: Vec<JoinHandle<()>>,
    cancelled: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Start `size` workers, each connecting its own session
    ///
    /// Returns once every worker holds a session. If any worker fails to
    /// connect, the workers that did connect are stopped and their sessions
    /// closed before the error is returned.
    pub async fn start<F: SessionFactory>(
        factory: Arc<F>,
        size: usize,
        settings: WorkerSettings,
    ) -> Result<Self, ScanError> {
        let (job_tx, job_rx) = mpsc::channel::<WorkUnit>(size.saturating_mul(2).max(1));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let cancelled = Arc::new(AtomicBool::new(false));

        let workers = (0..size)
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    Arc::clone(&factory),
                    settings,
                    Arc::clone(&job_rx),
                    event_tx.clone(),
                    ready_tx.clone(),
                    Arc::clone(&cancelled),
                ))
            })
            .collect();
        drop(event_tx);
        drop(ready_tx);

        let pool = Self {
            job_tx: Some(job_tx),
            event_rx,
            workers,
            cancelled,
        };

        let mut failure = None;
        for _ in 0..size {
            match ready_rx.recv().await {
                Some((_, Ok(()))) => {},
                Some((worker, Err(source))) => {
                    warn!(worker, error = %source, "Worker failed to open its session");
                    failure.get_or_insert(ScanError::WorkerInitializationFailure { worker, source });
                },
                None => {
                    failure.get_or_insert(ScanError::WorkerPanicked(
                        "worker exited during startup".to_string(),
                    ));
                    break;
                },
            }
        }

        if let Some(err) = failure {
            pool.cancel();
            // The startup error is more useful than any join error.
            let _ = pool.shutdown().await;
            return Err(err);
        }

        debug!(workers = size, "Worker pool started");
        Ok(pool)
    }

    /// Number of workers
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue handle for a task that feeds units into the pool
    pub fn sender(&self) -> Option<mpsc::Sender<WorkUnit>> {
        self.job_tx.clone()
    }

    /// Queue one unit, waiting for space
    pub async fn dispatch(&self, unit: WorkUnit) -> Result<(), ScanError> {
        let tx = self.job_tx.as_ref().ok_or(ScanError::PoolClosed { outstanding: 1 })?;
        tx.send(unit)
            .await
            .map_err(|_| ScanError::PoolClosed { outstanding: 1 })
    }

    /// Next event from any worker; `None` once every worker has stopped
    pub async fn next_event(&mut self) -> Option<WorkerEvent> {
        self.event_rx.recv().await
    }

    /// Ask workers to stop after their current unit
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Close the queue and wait for every worker to close its session
    pub async fn shutdown(mut self) -> Result<(), ScanError> {
        self.job_tx.take();

        let mut panicked = None;
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    panicked.get_or_insert_with(|| ScanError::WorkerPanicked(e.to_string()));
                }
            }
        }

        match panicked {
            Some(err) => Err(err),
            None => {
                debug!("Worker pool shut down");
                Ok(())
            },
        }
    }
}

type ReadySender = mpsc::UnboundedSender<(usize, Result<(), SessionError>)>;

/// Worker body: connect once, serve units, close the session
async fn run_worker<F: SessionFactory>(
    worker: usize,
    factory: Arc<F>,
    settings: WorkerSettings,
    jobs: Arc<Mutex<mpsc::Receiver<WorkUnit>>>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    ready: ReadySender,
    cancelled: Arc<AtomicBool>,
) {
    let session = match factory.connect().await {
        Ok(session) => session,
        Err(e) => {
            let _ = ready.send((worker, Err(e)));
            return;
        },
    };
    metrics::worker_session_delta(1);
    let _ = ready.send((worker, Ok(())));
    drop(ready);

    let executor = RangeQueryExecutor::new(session, worker)
        .with_timeout(settings.timeout)
        .with_verbose(settings.verbose);

    serve_units(&executor, &jobs, &events, &cancelled).await;

    if let Err(e) = executor.close().await {
        warn!(worker, error = %e, "Failed to close session");
    }
    metrics::worker_session_delta(-1);
    debug!(worker, "Worker stopped");
}

async fn serve_units<S: Session>(
    executor: &RangeQueryExecutor<S>,
    jobs: &Mutex<mpsc::Receiver<WorkUnit>>,
    events: &mpsc::UnboundedSender<WorkerEvent>,
    cancelled: &AtomicBool,
) {
    let worker = executor.worker();
    loop {
        let unit = { jobs.lock().await.recv().await };
        let Some(unit) = unit else { break };
        if cancelled.load(Ordering::Acquire) {
            break;
        }

        if !unit.delay.is_zero() {
            tokio::time::sleep(unit.delay).await;
        }

        let results = AssertUnwindSafe(execute_unit(executor, &unit.ranges))
            .catch_unwind()
            .await;

        let event = match results {
            Ok(results) => WorkerEvent::Completed(UnitReport {
                unit_id: unit.id,
                worker,
                retries_used: unit.retries_used,
                outcomes: unit.ranges.iter().copied().zip(results).collect(),
            }),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let _ = events.send(WorkerEvent::Panicked { worker, message });
                break;
            },
        };

        if events.send(event).is_err() {
            break;
        }
    }
}

async fn execute_unit<S: Session>(
    executor: &RangeQueryExecutor<S>,
    ranges: &[TokenRange],
) -> Vec<Result<u64, SessionError>> {
    match ranges {
        [range] => vec![executor.execute(*range).await],
        _ => executor.execute_batch(ranges).await,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryCluster;

    #[tokio::test]
    async fn test_each_worker_connects_once() {
        let cluster = MemoryCluster::new([1, 2, 3]);
        let pool = WorkerPool::start(Arc::new(cluster.clone()), 4, WorkerSettings::default())
            .await
            .unwrap();
        assert_eq!(pool.size(), 4);
        assert_eq!(cluster.sessions_opened(), 4);

        pool.shutdown().await.unwrap();
        assert_eq!(cluster.sessions_closed(), 4);
    }

    #[tokio::test]
    async fn test_init_failure_closes_connected_workers() {
        let cluster = MemoryCluster::new([]);
        cluster.fail_next_connects(1);

        let result = WorkerPool::start(Arc::new(cluster.clone()), 3, WorkerSettings::default()).await;
        assert!(matches!(
            result,
            Err(ScanError::WorkerInitializationFailure { .. })
        ));
        assert_eq!(cluster.sessions_opened(), 2);
        assert_eq!(cluster.sessions_closed(), 2);
    }

    #[tokio::test]
    async fn test_units_are_reported() {
        let cluster = MemoryCluster::new([1, 2, 3, 10]);
        let mut pool = WorkerPool::start(Arc::new(cluster), 2, WorkerSettings::default())
            .await
            .unwrap();

        pool.dispatch(WorkUnit::new(0, vec![TokenRange::new_unchecked(0, 5)]))
            .await
            .unwrap();
        pool.dispatch(WorkUnit::new(
            1,
            vec![TokenRange::new_unchecked(6, 9), TokenRange::new_unchecked(10, 10)],
        ))
        .await
        .unwrap();

        let mut rows = Vec::new();
        for _ in 0..2 {
            match pool.next_event().await {
                Some(WorkerEvent::Completed(report)) => {
                    for (_, outcome) in report.outcomes {
                        rows.push(outcome.unwrap());
                    }
                },
                other => panic!("unexpected event: {:?}", other),
            }
        }
        rows.sort_unstable();
        assert_eq!(rows, vec![0, 1, 3]);

        pool.shutdown().await.unwrap();
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("worker exploded");
        assert_eq!(panic_message(payload.as_ref()), "worker exploded");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
