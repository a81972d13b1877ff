//! Filesystem-backed [`DocumentStore`].
//!
//! Writes go to a uniquely named sibling `*.partial` file that is renamed
//! over the target once fully written, so a reader never observes a
//! half-written document and two writers never share a staging file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use docpipe_core::{codec, Document};
use tracing::debug;
use uuid::Uuid;

use super::StoreError;
use crate::traits::DocumentStore;

/// Reads and writes encoded documents on the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct FsDocumentStore;

impl FsDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn partial_path(path: &Path, token: Uuid) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("document"));
    name.push(format!(".{}.partial", token.simple()));
    path.with_file_name(name)
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn open(&self, path: &Path) -> Result<Document, StoreError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        let content = codec::decode(&bytes).map_err(|e| StoreError::codec(path, e))?;
        debug!(path = %path.display(), bytes = bytes.len(), "opened document");
        Ok(Document::new(path, content))
    }

    async fn write(&self, document: &Document, path: &Path) -> Result<u64, StoreError> {
        let bytes = codec::encode(document.content()).map_err(|e| StoreError::codec(path, e))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        let staging = partial_path(path, Uuid::new_v4());
        if let Err(e) = tokio::fs::write(&staging, &bytes).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(StoreError::io(&staging, e));
        }
        if let Err(e) = tokio::fs::rename(&staging, path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(StoreError::io(path, e));
        }

        debug!(path = %path.display(), bytes = bytes.len(), "wrote document");
        Ok(bytes.len() as u64)
    }

    async fn backup(&self, source: &Path, target: &Path) -> Result<u64, StoreError> {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }
        let copied = tokio::fs::copy(source, target)
            .await
            .map_err(|e| StoreError::io(source, e))?;
        debug!(source = %source.display(), target = %target.display(), bytes = copied, "backed up document");
        Ok(copied)
    }
}
