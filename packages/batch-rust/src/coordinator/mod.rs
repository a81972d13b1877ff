//! Batch coordinator: runs many independent jobs across a fixed pool of
//! workers and collects a report in submission order.
//!
//! Workers share one job queue and one report, each behind a
//! `parking_lot::Mutex`; nothing else is shared between them. Cancellation
//! and continue-on-error are honored only at job boundaries.

pub mod config;
pub mod control;
mod worker;

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

pub use config::BatchConfig;
pub use control::{BatchController, BatchState, CancelHandle, CancelReason, InFlightGuard};

use crate::clock::{ClockSource, SystemClock};
use crate::job::{normalize_path, Job, JobId, JobStatus};
use crate::report::{BatchReport, ReportBuilder};
use crate::service::build_job_stack;
use crate::traits::DocumentStore;

// ---------------------------------------------------------------------------
// Errors and events
// ---------------------------------------------------------------------------

/// Contract violations detected before any worker starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("worker count must be at least 1")]
    ZeroWorkers,
    #[error("{job_id} has an empty pipeline")]
    EmptyPipeline { job_id: JobId },
    #[error("{second} writes to {path:?}, which {first} already writes to")]
    DuplicateOutput {
        path: PathBuf,
        first: JobId,
        second: JobId,
    },
    #[error("{writer} writes to {path:?}, which is the input of {reader}")]
    OutputOverwritesInput {
        path: PathBuf,
        writer: JobId,
        reader: JobId,
    },
}

/// Progress notifications, delivered in the order each worker produces them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    JobStarted { job_id: JobId },
    JobFinished { job_id: JobId, status: JobStatus },
}

// ---------------------------------------------------------------------------
// Shared worker state
// ---------------------------------------------------------------------------

pub(crate) struct Shared {
    jobs: Arc<[Job]>,
    queue: Mutex<VecDeque<JobId>>,
    report: ReportBuilder,
    config: BatchConfig,
    controller: Arc<BatchController>,
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn ClockSource>,
    events: Option<mpsc::UnboundedSender<BatchEvent>>,
}

impl Shared {
    fn emit(&self, event: BatchEvent) {
        if let Some(events) = &self.events {
            // The receiver may have been dropped; progress is best-effort.
            let _ = events.send(event);
        }
    }
}

// ---------------------------------------------------------------------------
// BatchRun
// ---------------------------------------------------------------------------

/// A validated batch, ready to run once.
pub struct BatchRun {
    id: Uuid,
    jobs: Arc<[Job]>,
    config: BatchConfig,
    controller: Arc<BatchController>,
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn ClockSource>,
    events: Option<mpsc::UnboundedSender<BatchEvent>>,
}

impl BatchRun {
    /// Validates the jobs against `config` and captures both.
    ///
    /// # Errors
    ///
    /// Returns a [`BatchError`] for a zero worker count, a job with no
    /// operations, two jobs sharing an output, or a job writing over another
    /// job's input.
    pub fn new(
        jobs: Vec<Job>,
        config: BatchConfig,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self, BatchError> {
        validate_jobs(&jobs, &config)?;
        Ok(Self {
            id: Uuid::new_v4(),
            jobs: jobs.into(),
            config,
            controller: Arc::new(BatchController::new()),
            store,
            clock: Arc::new(SystemClock),
            events: None,
        })
    }

    /// Replaces the clock used for job timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Streams progress events to `events`.
    #[must_use]
    pub fn with_events(mut self, events: mpsc::UnboundedSender<BatchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Handle for cancelling this batch from elsewhere, before or during `run`.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(Arc::clone(&self.controller))
    }

    /// Runs every job and returns the sealed report.
    ///
    /// Spawns exactly `worker_count` workers. Returns once the queue is empty
    /// and no job is running.
    pub async fn run(self) -> BatchReport {
        let batch_started = self.clock.now_ms();
        let job_count = self.jobs.len();
        let worker_count = self.config.worker_count;

        self.controller.set_running();
        info!(
            batch_id = %self.id,
            jobs = job_count,
            workers = worker_count,
            continue_on_error = self.config.continue_on_error,
            "batch started"
        );

        let shared = Arc::new(Shared {
            queue: Mutex::new((0..job_count).map(JobId).collect()),
            report: ReportBuilder::new(job_count),
            jobs: self.jobs,
            config: self.config,
            controller: Arc::clone(&self.controller),
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            events: self.events,
        });

        let stack = build_job_stack(self.store, shared.config.default_job_timeout);
        let handles: Vec<_> = (0..worker_count)
            .map(|index| tokio::spawn(worker::run_worker(index, Arc::clone(&shared), stack.clone())))
            .collect();

        for handle in handles {
            if let Err(err) = handle.await {
                error!(batch_id = %self.id, error = %err, "worker terminated abnormally");
            }
        }

        let cancelled = self.controller.cancel_reason();
        let elapsed_ms = self.clock.now_ms().saturating_sub(batch_started);
        let report = shared.report.seal(self.id, &shared.jobs, cancelled, elapsed_ms);
        self.controller.set_finished();

        let summary = report.summary();
        info!(
            batch_id = %self.id,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            elapsed_ms,
            "batch finished"
        );
        report
    }
}

fn validate_jobs(jobs: &[Job], config: &BatchConfig) -> Result<(), BatchError> {
    if config.worker_count == 0 {
        return Err(BatchError::ZeroWorkers);
    }

    // Compared after resolving `.` and `..` so aliases of one path collide.
    let mut outputs: HashMap<PathBuf, JobId> = HashMap::with_capacity(jobs.len());
    for (index, job) in jobs.iter().enumerate() {
        let id = JobId(index);
        if job.pipeline().is_empty() {
            return Err(BatchError::EmptyPipeline { job_id: id });
        }
        let output = normalize_path(job.output());
        if let Some(&first) = outputs.get(&output) {
            return Err(BatchError::DuplicateOutput {
                path: job.output().to_path_buf(),
                first,
                second: id,
            });
        }
        outputs.insert(output, id);
    }

    for (index, job) in jobs.iter().enumerate() {
        if let Some(&writer) = outputs.get(&normalize_path(job.input())) {
            if writer.0 != index {
                return Err(BatchError::OutputOverwritesInput {
                    path: job.input().to_path_buf(),
                    writer,
                    reader: JobId(index),
                });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
