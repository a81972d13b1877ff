//! Document store implementations.
//!
//! - [`FsDocumentStore`]: files on disk, atomic replace on write
//! - [`MemoryDocumentStore`]: encoded documents held in a [`DashMap`](dashmap::DashMap)

pub mod fs;
pub mod memory;

use std::path::{Path, PathBuf};

use docpipe_core::codec::CodecError;

use crate::job::JobId;

pub use fs::FsDocumentStore;
pub use memory::MemoryDocumentStore;

/// Errors raised while opening or writing a document.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {source}", path.display())]
    Codec {
        path: PathBuf,
        #[source]
        source: CodecError,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound { path }
        } else {
            Self::Io { path, source }
        }
    }

    pub(crate) fn codec(path: impl Into<PathBuf>, source: CodecError) -> Self {
        Self::Codec {
            path: path.into(),
            source,
        }
    }
}

/// Where the backup of `source` goes inside `dir`: the source's stem,
/// the time the backup was taken and the job id, then the source's extension.
#[must_use]
pub fn backup_path(dir: &Path, source: &Path, taken_at_ms: u64, job: JobId) -> PathBuf {
    let stem = source
        .file_stem()
        .map_or_else(|| "document".into(), |s| s.to_string_lossy());
    let mut name = format!("{stem}_{taken_at_ms}_{job}");
    if let Some(ext) = source.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    dir.join(name)
}
