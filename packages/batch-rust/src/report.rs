//! Batch report: per-job outcomes in submission order plus summary counts.
//!
//! Workers finish out of order, so outcomes are written into slots
//! pre-allocated by submission position. Reading the sealed report never
//! needs a sort.

use std::fmt::Write as _;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coordinator::CancelReason;
use crate::job::{Job, JobId, JobOutcome, JobStatus};

// ---------------------------------------------------------------------------
// BatchSummary
// ---------------------------------------------------------------------------

/// Counts computed once the batch reaches a terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    /// Jobs whose output was written, including partial commits.
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    /// Total bytes written across all outputs.
    pub output_bytes: u64,
    /// Wall time from batch start to seal.
    pub elapsed_ms: u64,
}

impl BatchSummary {
    fn from_outcomes(outcomes: &[JobOutcome], elapsed_ms: u64) -> Self {
        let mut summary = Self {
            total: outcomes.len(),
            elapsed_ms,
            ..Self::default()
        };
        for outcome in outcomes {
            match outcome.status {
                JobStatus::Succeeded { .. } => summary.succeeded += 1,
                JobStatus::Failed { .. } => summary.failed += 1,
                JobStatus::Skipped { .. } => summary.skipped += 1,
                JobStatus::Cancelled => summary.cancelled += 1,
            }
            summary.output_bytes += outcome.output_bytes.unwrap_or(0);
        }
        summary
    }

    /// Share of jobs that succeeded, as a percentage. `0.0` for an empty batch.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total as f64 * 100.0
        }
    }
}

// ---------------------------------------------------------------------------
// BatchReport
// ---------------------------------------------------------------------------

/// Sealed, read-only result of a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    /// Set when the batch was cancelled, with the first reason.
    pub cancelled: Option<CancelReason>,
    outcomes: Vec<JobOutcome>,
    summary: BatchSummary,
}

impl BatchReport {
    /// Outcomes in submission order.
    #[must_use]
    pub fn outcomes(&self) -> &[JobOutcome] {
        &self.outcomes
    }

    #[must_use]
    pub fn get(&self, id: JobId) -> Option<&JobOutcome> {
        self.outcomes.get(id.0)
    }

    #[must_use]
    pub fn summary(&self) -> &BatchSummary {
        &self.summary
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.summary.failed == 0 && self.summary.cancelled == 0
    }

    /// Pretty-printed JSON rendering of the whole report.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// One row per job, with a header row.
    #[must_use]
    pub fn to_csv(&self) -> String {
        let mut out = String::from(
            "job_id,input,output,status,reason,duration_ms,output_bytes,operations_succeeded,operations_failed\n",
        );
        for outcome in &self.outcomes {
            let (ops_ok, ops_failed) = outcome.pipeline.as_ref().map_or((String::new(), String::new()), |p| {
                let summary = p.summary();
                (summary.succeeded.to_string(), summary.failed.to_string())
            });
            let fields = [
                outcome.job_id.0.to_string(),
                outcome.input.display().to_string(),
                outcome.output.display().to_string(),
                outcome.status.label().to_string(),
                outcome.status.reason().unwrap_or_default(),
                outcome.duration_ms().map(|d| d.to_string()).unwrap_or_default(),
                outcome.output_bytes.map(|b| b.to_string()).unwrap_or_default(),
                ops_ok,
                ops_failed,
            ];
            let row: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
            let _ = writeln!(out, "{}", row.join(","));
        }
        out
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// ReportBuilder
// ---------------------------------------------------------------------------

/// Collects outcomes while the batch runs.
#[derive(Debug)]
pub struct ReportBuilder {
    slots: Mutex<Vec<Option<JobOutcome>>>,
}

impl ReportBuilder {
    /// Pre-allocates one empty slot per job.
    #[must_use]
    pub fn new(job_count: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; job_count]),
        }
    }

    /// Stores an outcome in its job's slot. A second outcome for the same job
    /// is ignored.
    pub fn record(&self, outcome: JobOutcome) {
        let mut slots = self.slots.lock();
        match slots.get_mut(outcome.job_id.0) {
            Some(slot @ None) => *slot = Some(outcome),
            Some(Some(_)) => {
                tracing::warn!(job_id = %outcome.job_id, "duplicate outcome ignored");
            }
            None => {
                tracing::warn!(job_id = %outcome.job_id, "outcome for unknown job ignored");
            }
        }
    }

    #[must_use]
    pub fn recorded(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    /// Freezes the report, leaving the builder empty. Jobs that never produced
    /// an outcome are recorded as cancelled.
    #[must_use]
    pub fn seal(
        &self,
        batch_id: Uuid,
        jobs: &[Job],
        cancelled: Option<CancelReason>,
        elapsed_ms: u64,
    ) -> BatchReport {
        let slots = std::mem::take(&mut *self.slots.lock());
        let outcomes: Vec<JobOutcome> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    let (input, output) = jobs
                        .get(index)
                        .map(|job| (job.input().to_path_buf(), job.output().to_path_buf()))
                        .unwrap_or_default();
                    JobOutcome::cancelled(JobId(index), input, output)
                })
            })
            .collect();
        let summary = BatchSummary::from_outcomes(&outcomes, elapsed_ms);
        BatchReport {
            batch_id,
            cancelled,
            outcomes,
            summary,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use docpipe_core::{FailurePolicy, Pipeline};
    use proptest::prelude::*;

    use super::*;
    use crate::job::JobFailure;

    fn jobs(n: usize) -> Vec<Job> {
        (0..n)
            .map(|i| {
                Job::new(
                    format!("in/{i}.dpdoc"),
                    format!("out/{i}.dpdoc"),
                    Pipeline::new(Vec::new(), FailurePolicy::Abort),
                )
            })
            .collect()
    }

    fn outcome(id: usize, status: JobStatus, bytes: Option<u64>) -> JobOutcome {
        JobOutcome {
            status,
            output_bytes: bytes,
            started_at_ms: Some(10),
            finished_at_ms: Some(25),
            ..JobOutcome::cancelled(
                JobId(id),
                PathBuf::from(format!("in/{id}.dpdoc")),
                PathBuf::from(format!("out/{id}.dpdoc")),
            )
        }
    }

    #[test]
    fn outcomes_are_read_in_submission_order() {
        let builder = ReportBuilder::new(3);
        builder.record(outcome(2, JobStatus::Succeeded { partial: false }, Some(5)));
        builder.record(outcome(0, JobStatus::Succeeded { partial: true }, Some(7)));
        builder.record(outcome(
            1,
            JobStatus::Failed {
                failure: JobFailure::Timeout { timeout_ms: 9 },
            },
            None,
        ));

        let report = builder.seal(Uuid::new_v4(), &jobs(3), None, 40);
        let ids: Vec<usize> = report.outcomes().iter().map(|o| o.job_id.0).collect();
        assert_eq!(ids, vec![0, 1, 2]);

        let summary = report.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.output_bytes, 12);
        assert_eq!(summary.elapsed_ms, 40);
        assert!(!report.is_clean());
    }

    #[test]
    fn seal_fills_missing_slots_as_cancelled() {
        let builder = ReportBuilder::new(4);
        builder.record(outcome(0, JobStatus::Succeeded { partial: false }, Some(1)));
        assert_eq!(builder.recorded(), 1);

        let report = builder.seal(Uuid::new_v4(), &jobs(4), Some(CancelReason::Requested), 0);
        assert_eq!(report.summary().cancelled, 3);
        let missing = report.get(JobId(3)).unwrap();
        assert_eq!(missing.status, JobStatus::Cancelled);
        assert_eq!(missing.input, PathBuf::from("in/3.dpdoc"));
        assert_eq!(report.cancelled, Some(CancelReason::Requested));
    }

    #[test]
    fn duplicate_outcomes_keep_the_first() {
        let builder = ReportBuilder::new(1);
        builder.record(outcome(0, JobStatus::Succeeded { partial: false }, Some(1)));
        builder.record(outcome(0, JobStatus::Cancelled, None));
        builder.record(outcome(5, JobStatus::Cancelled, None));

        let report = builder.seal(Uuid::new_v4(), &jobs(1), None, 0);
        assert_eq!(report.outcomes().len(), 1);
        assert_eq!(report.outcomes()[0].status, JobStatus::Succeeded { partial: false });
    }

    #[test]
    fn csv_escapes_and_json_serializes() {
        let builder = ReportBuilder::new(1);
        builder.record(outcome(
            0,
            JobStatus::Failed {
                failure: JobFailure::Io {
                    reason: "bad \"path\", really".to_string(),
                },
            },
            None,
        ));
        let report = builder.seal(Uuid::new_v4(), &jobs(1), None, 3);

        let csv = report.to_csv();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("job_id,input,output,status"));
        assert_eq!(
            lines.next().unwrap(),
            "0,in/0.dpdoc,out/0.dpdoc,failed,\"I/O error: bad \"\"path\"\", really\",15,,,"
        );

        let json: serde_json::Value = serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["summary"]["failed"], 1);
        assert_eq!(json["outcomes"][0]["status"], "failed");
        assert!(json["cancelled"].is_null());
    }

    proptest! {
        #[test]
        fn any_recording_order_reads_back_in_submission_order(
            order in Just((0..12usize).collect::<Vec<_>>()).prop_shuffle(),
            recorded in 0..=12usize,
        ) {
            let builder = ReportBuilder::new(12);
            for &id in order.iter().take(recorded) {
                builder.record(outcome(id, JobStatus::Succeeded { partial: false }, Some(1)));
            }
            let report = builder.seal(Uuid::new_v4(), &jobs(12), None, 0);

            let ids: Vec<usize> = report.outcomes().iter().map(|o| o.job_id.0).collect();
            prop_assert_eq!(ids, (0..12).collect::<Vec<_>>());
            prop_assert_eq!(report.summary().succeeded, recorded);
            prop_assert_eq!(report.summary().cancelled, 12 - recorded);
        }
    }

    #[test]
    fn success_rate_handles_empty_batch() {
        assert!(BatchSummary::default().success_rate().abs() < f64::EPSILON);
        let summary = BatchSummary {
            total: 4,
            succeeded: 3,
            ..BatchSummary::default()
        };
        assert!((summary.success_rate() - 75.0).abs() < 1e-9);
    }
}
