//! Tower middleware layers for the job execution stack.
//!
//! - [`timeout`]: Per-job timeout enforcement
//! - [`metrics`]: Job timing and counting via `tracing` spans and `metrics`
//! - [`stack`]: Composes all layers around the [`JobExecutor`](super::JobExecutor)

pub mod metrics;
pub mod stack;
pub mod timeout;

pub use metrics::MetricsLayer;
pub use stack::{build_job_stack, JobStack};
pub use timeout::TimeoutLayer;
