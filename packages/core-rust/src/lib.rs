//! `docpipe` core: document model, copy-on-write snapshots, the operation
//! contract, built-in edits, and the pipeline engine.

pub mod codec;
pub mod document;
pub mod edits;
pub mod operation;
pub mod pipeline;
pub mod types;

pub use document::{Document, Snapshot};
pub use edits::EditOperation;
pub use operation::{ApplyError, ApplyOutcome, Operation, ValidationError, ValidationOutcome};
pub use pipeline::{
    AllFailedPolicy, FailurePolicy, OperationSummary, Pipeline, PipelineConfig, PipelineResult,
    PipelineStatus, StepOutcome, StepStatus,
};
pub use types::{Annotation, AnnotationKind, DocumentContent, Page, Rect, TextBlock};
