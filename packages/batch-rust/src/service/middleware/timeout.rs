//! Deadline middleware for jobs.
//!
//! The layer owns the batch-wide default; a request's own `timeout`
//! overrides it. A job with neither runs unbounded. On expiry the inner
//! future is dropped and the job fails with [`JobError::Timeout`]; the
//! blocking pipeline it started is detached and its result discarded.

use std::future::Future;
use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};

use crate::service::request::{JobError, JobFuture, JobRequest, ProcessedJob};

/// Wraps a job service with deadline enforcement.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutLayer {
    default: Option<Duration>,
}

impl TimeoutLayer {
    /// `default` applies to requests that carry no timeout of their own.
    #[must_use]
    pub fn new(default: Option<Duration>) -> Self {
        Self { default }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            default: self.default,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    default: Option<Duration>,
}

impl<S> TimeoutService<S> {
    fn deadline_for(&self, request: &JobRequest) -> Option<Duration> {
        request.timeout.or(self.default)
    }
}

async fn within<F>(deadline: Option<Duration>, job: F) -> Result<ProcessedJob, JobError>
where
    F: Future<Output = Result<ProcessedJob, JobError>>,
{
    let Some(limit) = deadline else {
        return job.await;
    };
    tokio::time::timeout(limit, job)
        .await
        .unwrap_or_else(|_| {
            Err(JobError::Timeout {
                timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            })
        })
}

impl<S> Service<JobRequest> for TimeoutService<S>
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
        let deadline = self.deadline_for(&request);
        Box::pin(within(deadline, self.inner.call(request)))
    }
}
