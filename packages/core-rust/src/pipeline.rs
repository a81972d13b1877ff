//! Operation pipeline: ordered, policy-governed application of operations to
//! one document.
//!
//! Execution state machine: `Pending -> Running -> {Committed, RolledBack,
//! PartiallyCommitted}`.
//!
//! The pipeline holds exactly one checkpoint [`Snapshot`] while it runs. Under
//! [`FailurePolicy::Abort`] the checkpoint is the state before the run, and
//! the first failure restores it. Under [`FailurePolicy::SkipAndContinue`] the
//! checkpoint advances after every successful step, so a failed `apply` is
//! undone without disturbing the steps that committed before it.
//!
//! Operations run strictly in submission order and are never retried.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::document::{Document, Snapshot};
use crate::edits::EditOperation;
use crate::operation::{ApplyError, Operation};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What the pipeline does when an operation fails validation or apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failure and restore the document to its pre-run state.
    #[default]
    Abort,
    /// Record the failure, skip the operation, and keep going.
    SkipAndContinue,
}

/// Outcome of a `SkipAndContinue` run in which every operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllFailedPolicy {
    /// Report `PartiallyCommitted` with zero changes; the unchanged document
    /// may still be written.
    #[default]
    WriteUnchanged,
    /// Report `RolledBack`, as if the run had aborted.
    RollBack,
}

/// Per-pipeline settings, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub all_failed: AllFailedPolicy,
}

impl From<FailurePolicy> for PipelineConfig {
    fn from(failure_policy: FailurePolicy) -> Self {
        Self {
            failure_policy,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Terminal state of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Every operation validated and applied.
    Committed,
    /// The document was restored to its pre-run state.
    RolledBack,
    /// Some operations failed and were skipped; the rest are applied.
    PartiallyCommitted,
}

impl PipelineStatus {
    /// Whether the document holds committed changes (possibly zero of them).
    #[must_use]
    pub fn is_committed(self) -> bool {
        matches!(self, Self::Committed | Self::PartiallyCommitted)
    }
}

/// Outcome of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    ValidationFailed { reason: String },
    ApplyFailed { reason: String },
}

impl StepStatus {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Human-readable failure reason, if the step failed.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Succeeded => None,
            Self::ValidationFailed { reason } | Self::ApplyFailed { reason } => Some(reason),
        }
    }
}

/// Record of one executed operation, in submission position `index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub index: usize,
    pub operation: String,
    #[serde(flatten)]
    pub status: StepStatus,
}

/// Aggregate counts over a [`PipelineResult`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OperationSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Operations never reached because the run aborted.
    pub not_run: usize,
    /// Percentage of all operations that succeeded.
    pub success_rate: f64,
}

/// Result of [`Pipeline::run`].
///
/// `steps` lists executed operations in submission order. After an abort,
/// operations past the failing one do not appear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub steps: Vec<StepOutcome>,
    pub status: PipelineStatus,
    pub operations_total: usize,
    pub elapsed_ms: u64,
}

impl PipelineResult {
    #[must_use]
    pub fn summary(&self) -> OperationSummary {
        let succeeded = self.steps.iter().filter(|s| s.status.is_success()).count();
        let failed = self.steps.len() - succeeded;
        #[allow(clippy::cast_precision_loss)]
        let success_rate = if self.operations_total == 0 {
            0.0
        } else {
            succeeded as f64 / self.operations_total as f64 * 100.0
        };
        OperationSummary {
            total: self.operations_total,
            succeeded,
            failed,
            not_run: self.operations_total - self.steps.len(),
            success_rate,
        }
    }

    /// The first failed step, if any.
    #[must_use]
    pub fn first_failure(&self) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| !s.status.is_success())
    }
}

// ---------------------------------------------------------------------------
// Execution state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutionState {
    Pending,
    Running,
    Finished(PipelineStatus),
}

/// Tracks the state machine of a single run and logs every transition.
struct Execution {
    source: PathBuf,
    state: ExecutionState,
}

impl Execution {
    fn new(source: PathBuf) -> Self {
        Self {
            source,
            state: ExecutionState::Pending,
        }
    }

    fn transition(&mut self, next: ExecutionState) {
        debug!(
            source = %self.source.display(),
            from = ?self.state,
            to = ?next,
            "pipeline state transition"
        );
        self.state = next;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Ordered list of operations plus the policy that governs failures.
#[derive(Debug)]
pub struct Pipeline {
    operations: Vec<Box<dyn Operation>>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Creates a pipeline with the given failure policy and default settings
    /// otherwise.
    #[must_use]
    pub fn new(operations: Vec<Box<dyn Operation>>, failure_policy: FailurePolicy) -> Self {
        Self::with_config(operations, failure_policy.into())
    }

    #[must_use]
    pub fn with_config(operations: Vec<Box<dyn Operation>>, config: PipelineConfig) -> Self {
        Self { operations, config }
    }

    /// Builds a pipeline from built-in edits.
    #[must_use]
    pub fn from_edits(edits: impl IntoIterator<Item = EditOperation>, config: PipelineConfig) -> Self {
        let operations = edits
            .into_iter()
            .map(|edit| Box::new(edit) as Box<dyn Operation>)
            .collect();
        Self::with_config(operations, config)
    }

    #[must_use]
    pub fn config(&self) -> PipelineConfig {
        self.config
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Names of the operations in submission order.
    pub fn operation_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.operations.iter().map(|op| op.name())
    }

    /// Runs every operation against `document` in order.
    ///
    /// Never fails: validation failures, apply failures and panics inside
    /// operations are all recorded in the returned [`PipelineResult`]. On
    /// return the document is either fully committed, partially committed
    /// under `SkipAndContinue`, or identical in content to its pre-run state.
    pub fn run(&self, document: &mut Document) -> PipelineResult {
        let started = Instant::now();
        let total = self.operations.len();
        let policy = self.config.failure_policy;

        let mut execution = Execution::new(document.source().to_path_buf());
        let mut checkpoint: Snapshot = document.snapshot();
        execution.transition(ExecutionState::Running);

        let mut steps = Vec::with_capacity(total);
        let mut succeeded = 0usize;
        let mut aborted = false;

        for (index, op) in self.operations.iter().enumerate() {
            let status = Self::run_step(op.as_ref(), document);

            if status.is_success() {
                document.mark_applied();
                succeeded += 1;
                if policy == FailurePolicy::SkipAndContinue {
                    checkpoint = document.snapshot();
                }
            } else {
                warn!(
                    source = %execution.source.display(),
                    index,
                    operation = op.name(),
                    reason = status.reason().unwrap_or_default(),
                    ?policy,
                    "operation failed"
                );
            }

            let apply_failed = matches!(status, StepStatus::ApplyFailed { .. });
            let failed = !status.is_success();
            steps.push(StepOutcome {
                index,
                operation: op.name().to_string(),
                status,
            });

            if !failed {
                continue;
            }
            match policy {
                FailurePolicy::Abort => {
                    aborted = true;
                    break;
                }
                FailurePolicy::SkipAndContinue => {
                    // A failed apply may have left partial effects behind.
                    if apply_failed {
                        document.restore(checkpoint.clone());
                    }
                }
            }
        }

        let status = if aborted {
            PipelineStatus::RolledBack
        } else if succeeded == total {
            PipelineStatus::Committed
        } else if succeeded == 0 && self.config.all_failed == AllFailedPolicy::RollBack {
            PipelineStatus::RolledBack
        } else {
            PipelineStatus::PartiallyCommitted
        };

        if status == PipelineStatus::RolledBack {
            document.restore(checkpoint);
        }
        execution.transition(ExecutionState::Finished(status));

        PipelineResult {
            steps,
            status,
            operations_total: total,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn run_step(op: &dyn Operation, document: &mut Document) -> StepStatus {
        match catch_unwind(AssertUnwindSafe(|| op.validate(document))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                return StepStatus::ValidationFailed {
                    reason: err.to_string(),
                }
            }
            Err(payload) => {
                return StepStatus::ValidationFailed {
                    reason: format!("validation panicked: {}", panic_message(payload.as_ref())),
                }
            }
        }

        let applied = catch_unwind(AssertUnwindSafe(|| op.apply(document)))
            .unwrap_or_else(|payload| Err(ApplyError::Panicked(panic_message(payload.as_ref()))));
        match applied {
            Ok(()) => StepStatus::Succeeded,
            Err(err) => StepStatus::ApplyFailed {
                reason: err.to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::operation::{ApplyOutcome, ValidationError, ValidationOutcome};
    use crate::types::{AnnotationKind, Rect};

    /// Mutates the document and then reports failure.
    #[derive(Debug)]
    struct DirtyFailure;

    impl Operation for DirtyFailure {
        fn name(&self) -> &'static str {
            "dirty_failure"
        }

        fn validate(&self, _document: &Document) -> ValidationOutcome {
            Ok(())
        }

        fn apply(&self, document: &mut Document) -> ApplyOutcome {
            document.content_mut().pages.clear();
            Err(ApplyError::Failed("disk full".to_string()))
        }
    }

    #[derive(Debug)]
    struct Panicking;

    impl Operation for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn validate(&self, _document: &Document) -> ValidationOutcome {
            Ok(())
        }

        fn apply(&self, document: &mut Document) -> ApplyOutcome {
            document.content_mut().metadata.insert("half".into(), "written".into());
            panic!("malformed input");
        }
    }

    #[derive(Debug)]
    struct AlwaysInvalid;

    impl Operation for AlwaysInvalid {
        fn name(&self) -> &'static str {
            "always_invalid"
        }

        fn validate(&self, _document: &Document) -> ValidationOutcome {
            Err(ValidationError::Invalid("never valid".to_string()))
        }

        fn apply(&self, _document: &mut Document) -> ApplyOutcome {
            unreachable!("apply must not run after failed validation")
        }
    }

    fn rotate(page: usize, angle: u16) -> Box<dyn Operation> {
        Box::new(EditOperation::RotatePage { page, angle })
    }

    fn annotate(page: usize) -> Box<dyn Operation> {
        Box::new(EditOperation::AddAnnotation {
            page,
            kind: AnnotationKind::Note,
            rect: Rect {
                x0: 10.0,
                y0: 10.0,
                x1: 50.0,
                y1: 50.0,
            },
            contents: "see appendix".to_string(),
            author: None,
        })
    }

    fn three_pages() -> Document {
        Document::blank("in.dpdoc", 3, 612.0, 792.0)
    }

    #[test]
    fn abort_on_invalid_annotation_rolls_back() {
        let mut document = three_pages();
        let before = document.content().clone();
        let pipeline = Pipeline::new(vec![rotate(0, 90), annotate(5)], FailurePolicy::Abort);

        let result = pipeline.run(&mut document);

        assert_eq!(result.status, PipelineStatus::RolledBack);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[0].status, StepStatus::Succeeded);
        assert_eq!(
            result.steps[1].status,
            StepStatus::ValidationFailed {
                reason: "page 5 out of range (document has 3 pages)".to_string()
            }
        );
        assert_eq!(document.content(), &before);
        assert!(!document.is_modified());
    }

    #[test]
    fn abort_stops_before_later_operations() {
        let mut document = three_pages();
        let pipeline = Pipeline::new(
            vec![Box::new(AlwaysInvalid), rotate(0, 90), rotate(1, 90)],
            FailurePolicy::Abort,
        );
        let result = pipeline.run(&mut document);
        assert_eq!(result.steps.len(), 1);
        let summary = result.summary();
        assert_eq!(summary.not_run, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(document.content().pages[0].rotation, 0);
    }

    #[test]
    fn abort_undoes_partial_apply_effects() {
        let mut document = three_pages();
        let before = document.content().clone();
        let pipeline = Pipeline::new(
            vec![rotate(1, 180), Box::new(DirtyFailure)],
            FailurePolicy::Abort,
        );
        let result = pipeline.run(&mut document);
        assert_eq!(result.status, PipelineStatus::RolledBack);
        assert_eq!(
            result.first_failure().map(|s| s.status.clone()),
            Some(StepStatus::ApplyFailed {
                reason: "disk full".to_string()
            })
        );
        assert_eq!(document.content(), &before);
    }

    #[test]
    fn skip_keeps_successes_and_drops_failed_effects() {
        let mut document = three_pages();
        let pipeline = Pipeline::new(
            vec![
                rotate(0, 90),
                Box::new(DirtyFailure),
                annotate(7),
                rotate(2, 270),
            ],
            FailurePolicy::SkipAndContinue,
        );
        let result = pipeline.run(&mut document);

        assert_eq!(result.status, PipelineStatus::PartiallyCommitted);
        assert_eq!(result.steps.len(), 4);
        let pages = &document.content().pages;
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].rotation, 90);
        assert_eq!(pages[2].rotation, 270);
        assert!(pages.iter().all(|p| p.annotations.is_empty()));
        assert_eq!(document.revision(), 3);
    }

    #[test]
    fn panics_are_contained_and_rolled_back() {
        let mut document = three_pages();
        let before = document.content().clone();
        let pipeline = Pipeline::new(vec![Box::new(Panicking)], FailurePolicy::Abort);
        let result = pipeline.run(&mut document);

        assert_eq!(result.status, PipelineStatus::RolledBack);
        assert_eq!(
            result.steps[0].status,
            StepStatus::ApplyFailed {
                reason: "operation panicked: malformed input".to_string()
            }
        );
        assert_eq!(document.content(), &before);
    }

    #[test]
    fn all_failed_policy_decides_status() {
        let ops = || -> Vec<Box<dyn Operation>> { vec![annotate(9), Box::new(AlwaysInvalid)] };

        let mut document = three_pages();
        let result = Pipeline::new(ops(), FailurePolicy::SkipAndContinue).run(&mut document);
        assert_eq!(result.status, PipelineStatus::PartiallyCommitted);
        assert!(!document.is_modified());

        let config = PipelineConfig {
            failure_policy: FailurePolicy::SkipAndContinue,
            all_failed: AllFailedPolicy::RollBack,
        };
        let mut document = three_pages();
        let result = Pipeline::with_config(ops(), config).run(&mut document);
        assert_eq!(result.status, PipelineStatus::RolledBack);
    }

    #[test]
    fn empty_pipeline_commits() {
        let mut document = three_pages();
        let result = Pipeline::new(Vec::new(), FailurePolicy::Abort).run(&mut document);
        assert_eq!(result.status, PipelineStatus::Committed);
        assert!(result.steps.is_empty());
        assert_eq!(result.summary().success_rate, 0.0);
    }

    #[test]
    fn result_serializes_flat_steps() {
        let mut document = three_pages();
        let result = Pipeline::new(vec![rotate(0, 45)], FailurePolicy::Abort).run(&mut document);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "rolled_back");
        assert_eq!(json["steps"][0]["operation"], "rotate_page");
        assert_eq!(json["steps"][0]["outcome"], "validation_failed");
    }

    // -- property tests ----------------------------------------------------

    fn edit_strategy() -> impl Strategy<Value = EditOperation> {
        prop_oneof![
            (0usize..5, prop::sample::select(vec![0u16, 90, 45, 180, 270]))
                .prop_map(|(page, angle)| EditOperation::RotatePage { page, angle }),
            (0usize..5).prop_map(|page| EditOperation::DeletePage { page }),
            (0usize..6).prop_map(|index| EditOperation::InsertPage {
                index,
                width: 300.0,
                height: 400.0
            }),
            (0usize..5, prop::sample::select(vec!["alpha", "beta"])).prop_map(|(page, text)| {
                EditOperation::AddText {
                    page,
                    text: text.to_string(),
                    x: 10.0,
                    y: 10.0,
                    font_size: 11.0,
                }
            }),
            prop::sample::select(vec!["alpha", "zzz"]).prop_map(|search| {
                EditOperation::ReplaceText {
                    search: search.to_string(),
                    replacement: "omega".to_string(),
                    page: None,
                }
            }),
            prop::sample::select(vec!["title", "bogus"]).prop_map(|key| {
                EditOperation::SetMetadata {
                    key: key.to_string(),
                    value: Some("v".to_string()),
                }
            }),
        ]
    }

    fn start_document(pages: usize) -> Document {
        let mut document = Document::blank("prop.dpdoc", pages, 612.0, 792.0);
        document.content_mut().pages[0].text.push(crate::types::TextBlock {
            x: 1.0,
            y: 1.0,
            font_size: 9.0,
            content: "alpha".to_string(),
        });
        document
    }

    proptest! {
        #[test]
        fn steps_follow_submission_order(
            edits in prop::collection::vec(edit_strategy(), 0..12),
            skip in any::<bool>(),
        ) {
            let policy = if skip { FailurePolicy::SkipAndContinue } else { FailurePolicy::Abort };
            let names: Vec<&str> = edits.iter().map(Operation::name).collect();
            let pipeline = Pipeline::from_edits(edits, policy.into());
            let mut document = start_document(3);
            let result = pipeline.run(&mut document);

            for (position, step) in result.steps.iter().enumerate() {
                prop_assert_eq!(step.index, position);
                prop_assert_eq!(step.operation.as_str(), names[position]);
            }
            if skip {
                prop_assert_eq!(result.steps.len(), names.len());
            }
        }

        #[test]
        fn abort_is_atomic(edits in prop::collection::vec(edit_strategy(), 1..12)) {
            let pipeline = Pipeline::from_edits(edits, FailurePolicy::Abort.into());
            let mut document = start_document(3);
            let before = document.content().clone();
            let result = pipeline.run(&mut document);

            match result.status {
                PipelineStatus::RolledBack => prop_assert_eq!(document.content(), &before),
                PipelineStatus::Committed => prop_assert!(result.first_failure().is_none()),
                PipelineStatus::PartiallyCommitted => prop_assert!(false, "abort never partially commits"),
            }
        }

        #[test]
        fn skip_applies_exactly_the_successful_operations(
            edits in prop::collection::vec(edit_strategy(), 1..12),
        ) {
            let mut expected = start_document(3);
            for edit in &edits {
                if edit.validate(&expected).is_ok() {
                    let mut trial = expected.clone();
                    if edit.apply(&mut trial).is_ok() {
                        expected = trial;
                    }
                }
            }

            let pipeline = Pipeline::from_edits(edits, FailurePolicy::SkipAndContinue.into());
            let mut document = start_document(3);
            pipeline.run(&mut document);
            prop_assert_eq!(document.content(), expected.content());
        }

        #[test]
        fn runs_are_deterministic(
            edits in prop::collection::vec(edit_strategy(), 0..12),
            skip in any::<bool>(),
        ) {
            let policy = if skip { FailurePolicy::SkipAndContinue } else { FailurePolicy::Abort };
            let pipeline = Pipeline::from_edits(edits, policy.into());

            let mut first = start_document(4);
            let mut second = start_document(4);
            let a = pipeline.run(&mut first);
            let b = pipeline.run(&mut second);

            prop_assert_eq!(a.status, b.status);
            prop_assert_eq!(a.steps, b.steps);
            prop_assert_eq!(first.content(), second.content());
        }
    }
}
