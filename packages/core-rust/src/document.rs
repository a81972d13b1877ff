//! In-memory document handle with copy-on-write snapshots.
//!
//! A [`Document`] owns its content behind an `Arc`. Taking a [`Snapshot`]
//! clones the `Arc`, not the content; the first mutation after a snapshot
//! pays for a single deep copy via `Arc::make_mut`. This keeps snapshots cheap
//! enough to take before every risky step of a pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::types::DocumentContent;

/// Mutable handle to one document.
///
/// Created per job, never shared between jobs. The revision counter only
/// ever grows, including across [`Document::restore`].
#[derive(Debug, Clone)]
pub struct Document {
    source: PathBuf,
    content: Arc<DocumentContent>,
    revision: u64,
    modified: bool,
}

impl Document {
    /// Wraps existing content read from `source`.
    #[must_use]
    pub fn new(source: impl Into<PathBuf>, content: DocumentContent) -> Self {
        Self {
            source: source.into(),
            content: Arc::new(content),
            revision: 0,
            modified: false,
        }
    }

    /// Creates a document with `page_count` empty pages.
    #[must_use]
    pub fn blank(source: impl Into<PathBuf>, page_count: usize, width: f64, height: f64) -> Self {
        Self::new(
            source,
            DocumentContent::with_blank_pages(page_count, width, height),
        )
    }

    /// Path the document was opened from.
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    #[must_use]
    pub fn content(&self) -> &DocumentContent {
        &self.content
    }

    /// Mutable access to the content. Copies the content first if a snapshot
    /// still shares it.
    pub fn content_mut(&mut self) -> &mut DocumentContent {
        Arc::make_mut(&mut self.content)
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.content.pages.len()
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether any operation has been committed since the document was opened.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Records that an operation was applied successfully.
    pub fn mark_applied(&mut self) {
        self.revision += 1;
        self.modified = true;
    }

    /// Captures the current state for a later [`Document::restore`].
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            content: Arc::clone(&self.content),
            revision: self.revision,
            modified: self.modified,
        }
    }

    /// Returns the document to the state captured by `snapshot`.
    ///
    /// Content and the modified flag are restored; the revision advances past
    /// the current one so observers never see it go backwards.
    pub fn restore(&mut self, snapshot: Snapshot) {
        self.content = snapshot.content;
        self.modified = snapshot.modified;
        self.revision += 1;
    }

    /// Consumes the handle, returning its content.
    #[must_use]
    pub fn into_content(self) -> DocumentContent {
        Arc::unwrap_or_clone(self.content)
    }
}

/// Opaque saved state of a [`Document`].
#[derive(Debug, Clone)]
pub struct Snapshot {
    content: Arc<DocumentContent>,
    revision: u64,
    modified: bool,
}

impl Snapshot {
    /// Revision of the document when the snapshot was taken.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Content captured by the snapshot.
    #[must_use]
    pub fn content(&self) -> &DocumentContent {
        &self.content
    }
}
