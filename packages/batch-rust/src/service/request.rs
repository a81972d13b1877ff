//! Request, response and error types flowing through the job stack.

use std::any::Any;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use docpipe_core::{Document, Pipeline, PipelineResult};

use crate::job::{JobFailure, JobId};
use crate::store::StoreError;

/// Boxed future returned by every service in the job stack.
pub type JobFuture = Pin<Box<dyn Future<Output = Result<ProcessedJob, JobError>> + Send>>;

/// A job handed to the execution stack by a worker.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub id: JobId,
    pub input: PathBuf,
    pub pipeline: Arc<Pipeline>,
    /// The job's own timeout; the timeout layer falls back to the batch default.
    pub timeout: Option<Duration>,
}

/// A document that went through its pipeline, ready to be written or dropped.
#[derive(Debug)]
pub struct ProcessedJob {
    pub document: Document,
    pub result: PipelineResult,
}

/// Job-level failures raised by the execution stack.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("job timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("job panicked: {message}")]
    Panicked { message: String },
    #[error("job cancelled before completion")]
    Cancelled,
}

impl JobError {
    /// Short label used as a metrics dimension.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Store(_) => "io_error",
            Self::Timeout { .. } => "timeout",
            Self::Panicked { .. } => "panicked",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<JobError> for JobFailure {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Store(e) => Self::Io {
                reason: e.to_string(),
            },
            JobError::Timeout { timeout_ms } => Self::Timeout { timeout_ms },
            JobError::Panicked { message } => Self::Panicked { reason: message },
            JobError::Cancelled => Self::Panicked {
                reason: "execution was cancelled by the runtime".to_string(),
            },
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_report_failures() {
        let failure: JobFailure = JobError::Timeout { timeout_ms: 10 }.into();
        assert_eq!(failure, JobFailure::Timeout { timeout_ms: 10 });

        let failure: JobFailure = JobError::Store(StoreError::NotFound {
            path: PathBuf::from("x.dpdoc"),
        })
        .into();
        assert_eq!(
            failure,
            JobFailure::Io {
                reason: "document not found: x.dpdoc".to_string()
            }
        );
    }

    #[test]
    fn panic_payloads_become_messages() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic payload");
    }
}
