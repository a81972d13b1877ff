//! Jobs (one document's pipeline run) and their outcomes.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use docpipe_core::{Pipeline, PipelineResult};
use serde::{Deserialize, Serialize};

/// Identity of a job: its position in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub usize);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Unit of batch work: read `input`, run `pipeline`, write `output`.
///
/// Immutable once constructed. The pipeline is held behind an `Arc` so a
/// worker can hand it to a blocking task and still abandon that task on
/// timeout.
#[derive(Debug, Clone)]
pub struct Job {
    input: PathBuf,
    output: PathBuf,
    pipeline: Arc<Pipeline>,
    timeout: Option<Duration>,
}

impl Job {
    #[must_use]
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, pipeline: Pipeline) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            pipeline: Arc::new(pipeline),
            timeout: None,
        }
    }

    /// Overrides the batch-wide default timeout for this job.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn input(&self) -> &Path {
        &self.input
    }

    #[must_use]
    pub fn output(&self) -> &Path {
        &self.output
    }

    #[must_use]
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether the output replaces the job's own input.
    #[must_use]
    pub fn is_in_place(&self) -> bool {
        normalize_path(&self.input) == normalize_path(&self.output)
    }
}

/// Resolves `.` and `..` components without touching the filesystem, so
/// `out/a.dpdoc` and `in/../out/a.dpdoc` compare equal. Symlinks are not
/// followed.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    normalized.components().next_back(),
                    Some(Component::Normal(_))
                ) && normalized.pop();
                if !popped && !normalized.has_root() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobFailure {
    /// The pipeline aborted and restored the document; nothing was written.
    RolledBack { reason: String },
    /// The pipeline partially committed but the batch does not save partial results.
    PartialNotSaved,
    /// Opening or writing the document failed.
    Io { reason: String },
    Timeout { timeout_ms: u64 },
    Panicked { reason: String },
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RolledBack { reason } => write!(f, "rolled back: {reason}"),
            Self::PartialNotSaved => f.write_str("partially committed; partial results are not saved"),
            Self::Io { reason } => write!(f, "I/O error: {reason}"),
            Self::Timeout { timeout_ms } => write!(f, "timed out after {timeout_ms}ms"),
            Self::Panicked { reason } => write!(f, "job panicked: {reason}"),
        }
    }
}

/// Final status of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// Output written. `partial` is set when some operations were skipped.
    Succeeded { partial: bool },
    /// Nothing to write (document unchanged and unchanged writes disabled).
    Skipped { reason: String },
    Failed { failure: JobFailure },
    /// Never started because the batch was cancelled.
    Cancelled,
}

impl JobStatus {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Short lowercase label for logs and tabular reports.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded { partial: false } => "succeeded",
            Self::Succeeded { partial: true } => "partially_succeeded",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Human-readable reason for anything other than a clean success.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Succeeded { partial: false } => None,
            Self::Succeeded { partial: true } => Some("some operations were skipped".to_string()),
            Self::Skipped { reason } => Some(reason.clone()),
            Self::Failed { failure } => Some(failure.to_string()),
            Self::Cancelled => Some("batch cancelled before the job started".to_string()),
        }
    }
}

/// Everything recorded about one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub input: PathBuf,
    pub output: PathBuf,
    #[serde(flatten)]
    pub status: JobStatus,
    /// Present whenever the pipeline ran to completion.
    pub pipeline: Option<PipelineResult>,
    pub started_at_ms: Option<u64>,
    pub finished_at_ms: Option<u64>,
    pub output_bytes: Option<u64>,
    /// BLAKE3 fingerprint of the written document.
    pub output_fingerprint: Option<String>,
    /// Copy of the input taken before an in-place write replaced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
}

impl JobOutcome {
    /// Outcome for a job that never left the queue.
    #[must_use]
    pub fn cancelled(job_id: JobId, input: PathBuf, output: PathBuf) -> Self {
        Self {
            job_id,
            input,
            output,
            status: JobStatus::Cancelled,
            pipeline: None,
            started_at_ms: None,
            finished_at_ms: None,
            output_bytes: None,
            output_fingerprint: None,
            backup: None,
        }
    }

    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at_ms, self.finished_at_ms) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use docpipe_core::FailurePolicy;

    use super::*;

    #[test]
    fn job_accessors() {
        let job = Job::new("in.dpdoc", "out.dpdoc", Pipeline::new(Vec::new(), FailurePolicy::Abort))
            .with_timeout(Duration::from_secs(3));
        assert_eq!(job.input(), Path::new("in.dpdoc"));
        assert_eq!(job.output(), Path::new("out.dpdoc"));
        assert_eq!(job.timeout(), Some(Duration::from_secs(3)));
        assert!(job.pipeline().is_empty());
    }

    #[test]
    fn status_labels_and_reasons() {
        let failed = JobStatus::Failed {
            failure: JobFailure::Timeout { timeout_ms: 250 },
        };
        assert!(failed.is_failure());
        assert_eq!(failed.label(), "failed");
        assert_eq!(failed.reason().unwrap(), "timed out after 250ms");
        assert_eq!(JobStatus::Succeeded { partial: false }.reason(), None);
        assert!(!JobStatus::Cancelled.is_failure());
    }

    #[test]
    fn outcome_serializes_status_inline() {
        let outcome = JobOutcome::cancelled(JobId(3), "a".into(), "b".into());
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["job_id"], 3);
        assert_eq!(json["status"], "cancelled");
        assert!(outcome.duration_ms().is_none());

        let failed = JobOutcome {
            status: JobStatus::Failed {
                failure: JobFailure::Io {
                    reason: "disk full".to_string(),
                },
            },
            ..outcome
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["failure"]["kind"], "io");
    }

    #[test]
    fn normalize_resolves_dot_segments() {
        assert_eq!(
            normalize_path(Path::new("in/../out/./a.dpdoc")),
            PathBuf::from("out/a.dpdoc")
        );
        assert_eq!(normalize_path(Path::new("../a/../b")), PathBuf::from("../b"));
        assert_eq!(normalize_path(Path::new("/../x")), PathBuf::from("/x"));

        let pipeline = || Pipeline::new(Vec::new(), FailurePolicy::Abort);
        assert!(Job::new("docs/a.dpdoc", "docs/./a.dpdoc", pipeline()).is_in_place());
        assert!(!Job::new("docs/a.dpdoc", "out/a.dpdoc", pipeline()).is_in_place());
    }

    #[test]
    fn job_id_display() {
        assert_eq!(JobId(7).to_string(), "job-7");
    }
}
