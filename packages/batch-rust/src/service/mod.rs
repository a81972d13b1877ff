//! Job execution framework.
//!
//! Every job a worker picks up goes through a `tower` stack:
//!
//! 1. **Metrics** (`middleware::metrics`): span, duration, outcome counters
//! 2. **Timeout** (`middleware::timeout`): per-job deadline
//! 3. **Executor** (`executor`): open the document, run the pipeline on the
//!    blocking pool
//!
//! Writing the output is left to the worker, after the stack returns, so an
//! abandoned job can never leave a file behind.

pub mod executor;
pub mod middleware;
pub mod request;

pub use executor::JobExecutor;
pub use middleware::{build_job_stack, JobStack};
pub use request::{JobError, JobFuture, JobRequest, ProcessedJob};
