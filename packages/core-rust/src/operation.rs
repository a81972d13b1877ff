//! The two-phase operation contract the pipeline engine is built on.
//!
//! `validate` is a pure check against the current document; `apply` performs
//! the mutation. The engine never relies on an operation to clean up after a
//! failed `apply`: recovery is the pipeline's job.

use std::fmt::Debug;

use crate::document::Document;

/// Result of [`Operation::validate`].
pub type ValidationOutcome = Result<(), ValidationError>;

/// Result of [`Operation::apply`].
pub type ApplyOutcome = Result<(), ApplyError>;

/// A single document mutation.
///
/// Implementations are immutable values: calling `validate` or `apply` must
/// not change the operation itself, so one pipeline can be run against many
/// documents.
pub trait Operation: Send + Sync + Debug {
    /// Short, stable name used in results and logs (e.g. `"rotate_page"`).
    fn name(&self) -> &'static str;

    /// Check the operation's parameters against the current document state.
    /// Must not mutate anything.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] describing why the operation cannot run.
    fn validate(&self, document: &Document) -> ValidationOutcome;

    /// Perform the mutation. On failure the document may be left in any state.
    ///
    /// # Errors
    ///
    /// Returns an [`ApplyError`] if the mutation could not be completed.
    fn apply(&self, document: &mut Document) -> ApplyOutcome;
}

/// Operation parameters are inconsistent with the document.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("page {page} out of range (document has {page_count} pages)")]
    PageOutOfRange { page: usize, page_count: usize },
    #[error("invalid rotation angle {angle}: must be 0, 90, 180 or 270")]
    InvalidAngle { angle: u16 },
    #[error("annotation {index} out of range on page {page} ({count} annotations)")]
    AnnotationOutOfRange {
        page: usize,
        index: usize,
        count: usize,
    },
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("{0}")]
    Invalid(String),
}

impl ValidationError {
    pub(crate) fn parameter(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// The mutation itself failed.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("{0}")]
    Failed(String),
    #[error("operation panicked: {0}")]
    Panicked(String),
    /// Failure reported by an external collaborator (OCR engine, exporter, ...).
    #[error("collaborator failed: {0:#}")]
    Collaborator(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_are_human_readable() {
        let err = ValidationError::PageOutOfRange {
            page: 5,
            page_count: 3,
        };
        assert_eq!(
            err.to_string(),
            "page 5 out of range (document has 3 pages)"
        );

        let err = ValidationError::parameter("opacity", "must be in (0, 1]");
        assert_eq!(err.to_string(), "invalid parameter `opacity`: must be in (0, 1]");
    }

    #[test]
    fn collaborator_errors_keep_context() {
        let source = anyhow::anyhow!("engine offline").context("ocr pass");
        let err = ApplyError::from(source);
        assert_eq!(err.to_string(), "collaborator failed: ocr pass: engine offline");
    }
}
