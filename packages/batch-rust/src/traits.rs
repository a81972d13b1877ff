use std::path::Path;

use async_trait::async_trait;
use docpipe_core::Document;

use crate::store::StoreError;

/// Pluggable document persistence consumed by the batch coordinator.
/// Implementations: filesystem ([`FsDocumentStore`](crate::store::FsDocumentStore)),
/// memory ([`MemoryDocumentStore`](crate::store::MemoryDocumentStore)).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Open the document stored at `path` as a fresh handle.
    async fn open(&self, path: &Path) -> Result<Document, StoreError>;

    /// Persist `document` at `path`, returning the number of bytes written.
    ///
    /// Implementations must not leave a partially written document at `path`
    /// if the write fails.
    async fn write(&self, document: &Document, path: &Path) -> Result<u64, StoreError>;

    /// Copy the document at `source` to `target` before it is replaced,
    /// returning the number of bytes copied.
    ///
    /// The default re-encodes through [`open`](Self::open) and
    /// [`write`](Self::write); stores that can copy raw bytes should.
    async fn backup(&self, source: &Path, target: &Path) -> Result<u64, StoreError> {
        let document = self.open(source).await?;
        self.write(&document, target).await
    }
}
