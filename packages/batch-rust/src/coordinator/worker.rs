//! Worker loop: dequeue a job, run it through the job stack, write the
//! output, record the outcome.

use std::sync::Arc;

use docpipe_core::{codec, Document, PipelineResult, PipelineStatus};
use tower::ServiceExt;
use tracing::{debug, warn};

use super::{BatchEvent, CancelReason, Shared};
use crate::job::{JobFailure, JobId, JobOutcome, JobStatus};
use crate::service::request::panic_message;
use crate::service::{JobRequest, JobStack, ProcessedJob};
use crate::store::backup_path;

/// Runs until the queue is empty. After cancellation every job still
/// dequeued is recorded as cancelled without being started.
pub(super) async fn run_worker(worker: usize, shared: Arc<Shared>, stack: JobStack) {
    debug!(worker, "worker started");
    let mut executed = 0usize;

    loop {
        let next = shared.queue.lock().pop_front();
        let Some(id) = next else {
            break;
        };

        if shared.controller.is_cancelled() {
            let job = &shared.jobs[id.0];
            let outcome = JobOutcome::cancelled(id, job.input().to_path_buf(), job.output().to_path_buf());
            metrics::counter!("docpipe_jobs_total", "outcome" => "cancelled").increment(1);
            shared.emit(BatchEvent::JobFinished {
                job_id: id,
                status: JobStatus::Cancelled,
            });
            shared.report.record(outcome);
            continue;
        }

        let guard = shared.controller.in_flight_guard();
        // Each job runs in its own task so that even a panic outside the
        // pipeline (e.g. in a store) only fails this job.
        let handle = tokio::spawn(execute(Arc::clone(&shared), stack.clone(), id));
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(err) => {
                let reason = if err.is_panic() {
                    panic_message(err.into_panic().as_ref())
                } else {
                    "job task was cancelled by the runtime".to_string()
                };
                let job = &shared.jobs[id.0];
                JobOutcome {
                    status: JobStatus::Failed {
                        failure: JobFailure::Panicked { reason },
                    },
                    finished_at_ms: Some(shared.clock.now_ms()),
                    ..JobOutcome::cancelled(id, job.input().to_path_buf(), job.output().to_path_buf())
                }
            }
        };
        drop(guard);
        executed += 1;

        let failed = outcome.status.is_failure();
        shared.emit(BatchEvent::JobFinished {
            job_id: id,
            status: outcome.status.clone(),
        });
        shared.report.record(outcome);

        if failed && !shared.config.continue_on_error {
            shared.controller.cancel(CancelReason::JobFailed { job_id: id });
        }
    }

    debug!(worker, executed, "worker finished");
}

async fn execute(shared: Arc<Shared>, stack: JobStack, id: JobId) -> JobOutcome {
    let job = &shared.jobs[id.0];
    let started_at = shared.clock.now_ms();
    shared.emit(BatchEvent::JobStarted { job_id: id });

    let request = JobRequest {
        id,
        input: job.input().to_path_buf(),
        pipeline: Arc::clone(job.pipeline()),
        timeout: job.timeout(),
    };

    let mut outcome = JobOutcome {
        started_at_ms: Some(started_at),
        ..JobOutcome::cancelled(id, job.input().to_path_buf(), job.output().to_path_buf())
    };

    match stack.oneshot(request).await {
        Ok(ProcessedJob { document, result }) => {
            finish(&shared, id, &document, &result, &mut outcome).await;
            outcome.pipeline = Some(result);
        }
        Err(err) => {
            warn!(job = %id, error = %err, "job failed before its output could be written");
            outcome.status = JobStatus::Failed {
                failure: err.into(),
            };
        }
    }

    outcome.finished_at_ms = Some(shared.clock.now_ms());
    outcome
}

/// Decides whether the processed document is written, and records the result.
async fn finish(
    shared: &Shared,
    id: JobId,
    document: &Document,
    result: &PipelineResult,
    outcome: &mut JobOutcome,
) {
    let partial = match result.status {
        PipelineStatus::RolledBack => {
            let reason = result.first_failure().map_or_else(
                || "pipeline rolled back".to_string(),
                |step| {
                    format!(
                        "operation {} ({}) failed: {}",
                        step.index,
                        step.operation,
                        step.status.reason().unwrap_or("unknown reason")
                    )
                },
            );
            outcome.status = JobStatus::Failed {
                failure: JobFailure::RolledBack { reason },
            };
            return;
        }
        PipelineStatus::PartiallyCommitted if !shared.config.save_partial_commits => {
            outcome.status = JobStatus::Failed {
                failure: JobFailure::PartialNotSaved,
            };
            return;
        }
        PipelineStatus::PartiallyCommitted => true,
        PipelineStatus::Committed => false,
    };

    if !shared.config.write_unmodified && !document.is_modified() {
        outcome.status = JobStatus::Skipped {
            reason: "document unchanged; nothing to write".to_string(),
        };
        return;
    }

    let job = &shared.jobs[id.0];
    if let Some(dir) = shared.config.backup_dir.as_deref().filter(|_| job.is_in_place()) {
        let target = backup_path(dir, job.input(), shared.clock.now_ms(), id);
        if let Err(err) = shared.store.backup(job.input(), &target).await {
            warn!(job = %id, backup = %target.display(), error = %err, "backup failed; input left untouched");
            outcome.status = JobStatus::Failed {
                failure: JobFailure::Io {
                    reason: format!("backup failed: {err}"),
                },
            };
            return;
        }
        debug!(job = %id, backup = %target.display(), "input backed up");
        outcome.backup = Some(target);
    }

    let output = job.output();
    match shared.store.write(document, output).await {
        Ok(bytes) => {
            outcome.output_bytes = Some(bytes);
            outcome.output_fingerprint = match codec::fingerprint(document.content()) {
                Ok(fingerprint) => Some(fingerprint),
                Err(err) => {
                    warn!(job = %id, error = %err, "could not fingerprint written document");
                    None
                }
            };
            outcome.status = JobStatus::Succeeded { partial };
            debug!(job = %id, output = %output.display(), bytes, "output written");
        }
        Err(err) => {
            warn!(job = %id, output = %output.display(), error = %err, "output write failed");
            outcome.status = JobStatus::Failed {
                failure: JobFailure::Io {
                    reason: err.to_string(),
                },
            };
        }
    }
}
