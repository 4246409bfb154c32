//! Bounded background job runtime.
//!
//! Every triggering operation enqueues one unit of work and returns
//! immediately; callers observe only the state transition, never completion.
//! Unlike a fire-and-forget spawn, the runtime is bounded on both axes: the
//! queue has a fixed capacity (enqueues beyond it are rejected with a typed
//! error the management surface maps to 503) and at most `workers` jobs
//! execute concurrently. Each job runs under a deadline; a job that exceeds
//! it is cancelled by dropping its future, and the executor gets a chance to
//! record the timeout on the affected rows.

use crate::config::{Config, RecognitionKind};
use crate::extraction;
use crate::indexing::IndexingService;
use crate::metrics::PipelineMetrics;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// One unit of background work.
#[derive(Debug, Clone)]
pub enum Job {
    /// Run text recognition for a pending extraction.
    Extract {
        /// Document to recognize.
        document_id: i64,
        /// Extraction row created by the trigger.
        extraction_id: i64,
        /// Provider to run.
        provider: RecognitionKind,
    },
    /// Rebuild a patient's whole chunk collection.
    ReindexPatient {
        /// Patient whose collection is rebuilt.
        patient_id: i64,
    },
    /// Index one document, optionally clearing its chunks first.
    IndexDocument {
        /// Document to index.
        document_id: i64,
        /// Specific extraction to use; latest completed when absent.
        extraction_id: Option<i64>,
        /// Delete existing chunks for the document before indexing.
        force: bool,
    },
}

/// Shared components a job needs while executing.
#[derive(Clone)]
pub struct JobContext {
    /// Connection pool; each job acquires its own connections from it.
    pub pool: PgPool,
    /// Process configuration.
    pub config: Arc<Config>,
    /// Indexing/reindex coordinator.
    pub indexing: Arc<IndexingService>,
    /// Pipeline counters.
    pub metrics: Arc<PipelineMetrics>,
}

/// Executes jobs; the production implementation drives the pipeline, tests
/// substitute stubs.
#[async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    /// Run one job to completion. Failures are recorded by the job itself
    /// and must not panic.
    async fn execute(&self, job: Job);

    /// Called after a job exceeded its deadline and was cancelled.
    async fn handle_timeout(&self, job: Job);
}

/// Errors returned when the queue cannot accept more work.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The queue is at capacity; the caller should retry later.
    #[error("job queue is full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },
    /// The worker runtime has shut down.
    #[error("job runtime is not running")]
    Closed,
}

struct QueuedJob {
    id: Uuid,
    job: Job,
}

/// Handle to the bounded worker runtime.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<QueuedJob>,
    depth: Arc<AtomicUsize>,
    capacity: usize,
}

/// A reserved queue slot that outlives row creation.
///
/// Triggers reserve capacity before persisting anything, so a full queue
/// rejects the request without leaving dangling pending rows behind.
pub struct JobSlot {
    permit: mpsc::OwnedPermit<QueuedJob>,
    depth: Arc<AtomicUsize>,
}

impl JobSlot {
    /// Commit the reserved slot with the job to run; returns the job id.
    pub fn commit(self, job: Job) -> Uuid {
        let id = Uuid::new_v4();
        self.depth.fetch_add(1, Ordering::Relaxed);
        self.permit.send(QueuedJob { id, job });
        id
    }
}

impl JobQueue {
    /// Start the runtime: a dispatcher draining the queue into at most
    /// `workers` concurrent executions, each bounded by `job_timeout`.
    pub fn start(
        executor: Arc<dyn JobExecutor>,
        workers: usize,
        capacity: usize,
        job_timeout: Duration,
    ) -> Self {
        let capacity = capacity.max(1);
        let (sender, mut receiver) = mpsc::channel::<QueuedJob>(capacity);
        let depth = Arc::new(AtomicUsize::new(0));
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));

        let dispatcher_depth = depth.clone();
        tokio::spawn(async move {
            loop {
                // Hold a worker slot before draining the queue so waiting
                // jobs keep counting against the queue capacity.
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let Some(queued) = receiver.recv().await else {
                    break;
                };
                dispatcher_depth.fetch_sub(1, Ordering::Relaxed);

                let executor = executor.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let QueuedJob { id, job } = queued;
                    tracing::debug!(job_id = %id, job = ?job, "Job started");
                    match tokio::time::timeout(job_timeout, executor.execute(job.clone())).await {
                        Ok(()) => tracing::debug!(job_id = %id, "Job finished"),
                        Err(_) => {
                            tracing::error!(
                                job_id = %id,
                                timeout_secs = job_timeout.as_secs(),
                                "Job exceeded its deadline and was cancelled"
                            );
                            executor.handle_timeout(job).await;
                        }
                    }
                });
            }
            tracing::info!("Job runtime stopped");
        });

        Self {
            sender,
            depth,
            capacity,
        }
    }

    /// Enqueue a job, rejecting when the queue is at capacity.
    pub fn try_enqueue(&self, job: Job) -> Result<Uuid, EnqueueError> {
        Ok(self.reserve()?.commit(job))
    }

    /// Reserve a queue slot without committing a job yet.
    pub fn reserve(&self) -> Result<JobSlot, EnqueueError> {
        match self.sender.clone().try_reserve_owned() {
            Ok(permit) => Ok(JobSlot {
                permit,
                depth: self.depth.clone(),
            }),
            Err(TrySendError::Full(_)) => Err(EnqueueError::QueueFull {
                capacity: self.capacity,
            }),
            Err(TrySendError::Closed(_)) => Err(EnqueueError::Closed),
        }
    }

    /// Number of accepted jobs not yet picked up by a worker.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

/// Production executor driving the extraction and indexing pipeline.
pub struct PipelineExecutor {
    ctx: JobContext,
}

impl PipelineExecutor {
    /// Wrap the shared job context.
    pub fn new(ctx: JobContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl JobExecutor for PipelineExecutor {
    async fn execute(&self, job: Job) {
        match job {
            Job::Extract {
                document_id,
                extraction_id,
                provider,
            } => extraction::run(&self.ctx, document_id, extraction_id, provider).await,
            Job::ReindexPatient { patient_id } => {
                match self.ctx.indexing.reindex_patient(patient_id).await {
                    Ok(report) => tracing::info!(
                        patient_id,
                        indexed = report.indexed,
                        skipped = report.skipped,
                        failed = report.failed,
                        total_chunks = report.total_chunks,
                        "Background reindex finished"
                    ),
                    Err(error) => {
                        tracing::error!(patient_id, error = %error, "Background reindex failed")
                    }
                }
            }
            Job::IndexDocument {
                document_id,
                extraction_id,
                force,
            } => {
                match self
                    .ctx
                    .indexing
                    .index_document(document_id, extraction_id, force)
                    .await
                {
                    Ok(chunks) => {
                        tracing::info!(document_id, chunks, "Background document index finished")
                    }
                    Err(error) => {
                        tracing::error!(
                            document_id,
                            error = %error,
                            "Background document index failed"
                        )
                    }
                }
            }
        }
    }

    async fn handle_timeout(&self, job: Job) {
        // Only extraction jobs own row state that must reflect the failure;
        // reindex/index jobs converge on re-trigger.
        if let Job::Extract {
            document_id,
            extraction_id,
            ..
        } = job
        {
            extraction::record_timeout(&self.ctx, document_id, extraction_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;

    struct BlockingExecutor {
        started: Arc<Notify>,
        release: Arc<Notify>,
        timed_out: Arc<AtomicBool>,
    }

    #[async_trait]
    impl JobExecutor for BlockingExecutor {
        async fn execute(&self, _job: Job) {
            self.started.notify_one();
            self.release.notified().await;
        }

        async fn handle_timeout(&self, _job: Job) {
            self.timed_out.store(true, Ordering::SeqCst);
        }
    }

    fn blocking_runtime(
        workers: usize,
        capacity: usize,
        timeout: Duration,
    ) -> (JobQueue, Arc<Notify>, Arc<Notify>, Arc<AtomicBool>) {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let timed_out = Arc::new(AtomicBool::new(false));
        let queue = JobQueue::start(
            Arc::new(BlockingExecutor {
                started: started.clone(),
                release: release.clone(),
                timed_out: timed_out.clone(),
            }),
            workers,
            capacity,
            timeout,
        );
        (queue, started, release, timed_out)
    }

    fn reindex_job() -> Job {
        Job::ReindexPatient { patient_id: 1 }
    }

    #[tokio::test]
    async fn full_queue_rejects_with_typed_error() {
        let (queue, started, release, _) =
            blocking_runtime(1, 1, Duration::from_secs(30));

        queue.try_enqueue(reindex_job()).expect("first job accepted");
        // Wait until the worker holds the first job so the channel slot is free.
        started.notified().await;

        queue.try_enqueue(reindex_job()).expect("second job queued");
        let error = queue.try_enqueue(reindex_job()).unwrap_err();
        assert!(matches!(error, EnqueueError::QueueFull { capacity: 1 }));
        assert_eq!(queue.depth(), 1);

        release.notify_waiters();
    }

    #[tokio::test]
    async fn deadline_cancels_and_reports_timeout() {
        let (queue, started, _release, timed_out) =
            blocking_runtime(1, 4, Duration::from_millis(50));

        queue.try_enqueue(reindex_job()).expect("job accepted");
        started.notified().await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(timed_out.load(Ordering::SeqCst), "timeout hook should fire");
    }

    #[tokio::test]
    async fn reserved_slot_counts_toward_capacity() {
        let (queue, started, release, _) =
            blocking_runtime(1, 1, Duration::from_secs(30));

        let slot = queue.reserve().expect("slot reserved");
        let error = queue.try_enqueue(reindex_job()).unwrap_err();
        assert!(matches!(error, EnqueueError::QueueFull { .. }));

        slot.commit(reindex_job());
        started.notified().await;
        assert_eq!(queue.depth(), 0);

        release.notify_waiters();
    }
}
