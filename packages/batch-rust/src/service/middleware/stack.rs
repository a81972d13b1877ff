//! Stack composition: combines all middleware layers around the executor.

use std::sync::Arc;
use std::time::Duration;

use tower::ServiceBuilder;

use super::metrics::{MetricsLayer, MetricsService};
use super::timeout::{TimeoutLayer, TimeoutService};
use crate::service::executor::JobExecutor;
use crate::traits::DocumentStore;

/// Concrete type of the assembled job stack.
pub type JobStack = MetricsService<TimeoutService<JobExecutor>>;

/// Build the job execution stack by wrapping a `JobExecutor` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `MetricsLayer` -- record timing and outcome, including timeouts
/// 2. `TimeoutLayer` -- enforce per-job timeouts around open + pipeline run,
///    falling back to `default_timeout`
///
/// The stack is cheap to clone; each worker holds its own clone.
#[must_use]
pub fn build_job_stack(store: Arc<dyn DocumentStore>, default_timeout: Option<Duration>) -> JobStack {
    ServiceBuilder::new()
        .layer(MetricsLayer)
        .layer(TimeoutLayer::new(default_timeout))
        .service(JobExecutor::new(store))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
