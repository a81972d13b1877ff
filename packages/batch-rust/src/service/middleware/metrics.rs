//! Metrics middleware for jobs.
//!
//! Wraps each job in a `tracing` span, records its duration and outcome, and
//! feeds the `metrics` facade (`docpipe_jobs_total`, `docpipe_job_duration_seconds`).
//! Without an installed recorder the `metrics` calls are no-ops.

use std::task::{Context, Poll};
use std::time::Instant;

use docpipe_core::PipelineStatus;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::request::{JobError, JobFuture, JobRequest, ProcessedJob};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments jobs with timing and counting.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records job duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

fn outcome_label(result: &Result<ProcessedJob, JobError>) -> &'static str {
    match result {
        Ok(processed) => match processed.result.status {
            PipelineStatus::Committed => "committed",
            PipelineStatus::PartiallyCommitted => "partially_committed",
            PipelineStatus::RolledBack => "rolled_back",
        },
        Err(err) => err.label(),
    }
}

impl<S> Service<JobRequest> for MetricsService<S>
where
    S: Service<JobRequest, Response = ProcessedJob, Error = JobError> + Send,
    S::Future: Send + 'static,
{
    type Response = ProcessedJob;
    type Error = JobError;
    type Future = JobFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: JobRequest) -> Self::Future {
        let job_id = request.id.0;
        let span = info_span!(
            "job",
            job_id = job_id,
            input = %request.input.display(),
            operations = request.pipeline.len(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(request);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();
                let outcome = outcome_label(&result);

                let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!("docpipe_jobs_total", "outcome" => outcome).increment(1);
                metrics::histogram!("docpipe_job_duration_seconds").record(elapsed.as_secs_f64());

                tracing::info!(job_id, duration_ms, outcome, "job processed");

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
