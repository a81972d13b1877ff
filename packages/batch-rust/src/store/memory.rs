//! In-memory [`DocumentStore`] backed by [`DashMap`].
//!
//! Documents are held in their encoded form so the codec is exercised exactly
//! as with the filesystem store. Suitable for tests and dry runs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use docpipe_core::{codec, Document, DocumentContent};

use super::StoreError;
use crate::traits::DocumentStore;

/// Concurrent map from path to encoded document bytes.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    files: DashMap<PathBuf, Vec<u8>>,
}

impl MemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `content` at `path`, replacing anything already there.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Codec`] if the content cannot be encoded.
    pub fn insert(&self, path: impl Into<PathBuf>, content: &DocumentContent) -> Result<(), StoreError> {
        let path = path.into();
        let bytes = codec::encode(content).map_err(|e| StoreError::codec(&path, e))?;
        self.files.insert(path, bytes);
        Ok(())
    }

    /// Stores raw bytes at `path` without encoding.
    pub fn insert_raw(&self, path: impl Into<PathBuf>, bytes: Vec<u8>) {
        self.files.insert(path.into(), bytes);
    }

    /// Decoded content at `path`, if present and well-formed.
    #[must_use]
    pub fn content(&self, path: &Path) -> Option<DocumentContent> {
        self.files
            .get(path)
            .and_then(|bytes| codec::decode(bytes.value()).ok())
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn open(&self, path: &Path) -> Result<Document, StoreError> {
        let bytes = self
            .files
            .get(path)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound {
                path: path.to_path_buf(),
            })?;
        let content = codec::decode(&bytes).map_err(|e| StoreError::codec(path, e))?;
        Ok(Document::new(path, content))
    }

    async fn write(&self, document: &Document, path: &Path) -> Result<u64, StoreError> {
        let bytes = codec::encode(document.content()).map_err(|e| StoreError::codec(path, e))?;
        let len = bytes.len() as u64;
        self.files.insert(path.to_path_buf(), bytes);
        Ok(len)
    }
}
