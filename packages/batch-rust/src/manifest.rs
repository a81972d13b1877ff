//! JSON batch manifests.
//!
//! A manifest names the jobs of a batch and the operations they run:
//!
//! ```json
//! {
//!   "operations": [{"type": "rotate_page", "parameters": {"page": 0, "angle": "${angle}"}}],
//!   "failure_policy": "skip_and_continue",
//!   "params": {"angle": 90},
//!   "jobs": [
//!     {"input": "in/a.dpdoc", "output": "out/a.dpdoc"},
//!     {"input": "in/b.dpdoc", "output": "out/b.dpdoc", "params": {"angle": 180}, "timeout_ms": 5000}
//!   ]
//! }
//! ```
//!
//! Any string value that is exactly `${name}` is replaced by the job's
//! parameter `name` (job params override manifest params) before the
//! operations are decoded.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use docpipe_core::codec::FILE_EXTENSION;
use docpipe_core::{AllFailedPolicy, EditOperation, FailurePolicy, Pipeline, PipelineConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use walkdir::WalkDir;

use crate::job::{Job, JobId};

/// Errors from loading a manifest or turning it into jobs.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed manifest: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{job_id}: unknown parameter `{name}`")]
    UnknownParameter { job_id: JobId, name: String },
    #[error("{job_id}: operation {index} is invalid: {source}")]
    InvalidOperation {
        job_id: JobId,
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to scan {path:?}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// One job entry in a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestJob {
    pub input: PathBuf,
    pub output: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
    /// Replaces the manifest-wide operations for this job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operations: Option<Vec<Value>>,
}

/// A whole batch description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub operations: Vec<Value>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub all_failed: AllFailedPolicy,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
    pub jobs: Vec<ManifestJob>,
}

impl Manifest {
    /// Parses a manifest from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Parse`] for malformed JSON.
    pub fn from_json(text: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads a manifest file. Relative job paths are resolved against the
    /// manifest's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut manifest = Self::from_json(&text)?;
        if let Some(base) = path.parent() {
            for job in &mut manifest.jobs {
                job.input = base.join(&job.input);
                job.output = base.join(&job.output);
            }
        }
        Ok(manifest)
    }

    /// Builds a manifest with one job per document file under `input_dir`,
    /// mirroring relative paths under `output_dir`. Jobs are sorted by path.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Walk`] if the directory cannot be scanned.
    pub fn from_dir(
        input_dir: &Path,
        output_dir: &Path,
        operations: Vec<Value>,
    ) -> Result<Self, ManifestError> {
        let mut jobs = Vec::new();
        for entry in WalkDir::new(input_dir).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|source| ManifestError::Walk {
                path: input_dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|s| s.to_str()) != Some(FILE_EXTENSION)
            {
                continue;
            }
            let relative = path.strip_prefix(input_dir).unwrap_or(path);
            jobs.push(ManifestJob {
                input: path.to_path_buf(),
                output: output_dir.join(relative),
                timeout_ms: None,
                params: BTreeMap::new(),
                operations: None,
            });
        }
        tracing::debug!(dir = %input_dir.display(), jobs = jobs.len(), "scanned input directory");
        Ok(Self {
            operations,
            failure_policy: FailurePolicy::default(),
            all_failed: AllFailedPolicy::default(),
            params: BTreeMap::new(),
            jobs,
        })
    }

    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            failure_policy: self.failure_policy,
            all_failed: self.all_failed,
        }
    }

    /// Resolves parameters and decodes each job's operations.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::UnknownParameter`] for a placeholder with no
    /// value, or [`ManifestError::InvalidOperation`] for an operation that does
    /// not decode.
    pub fn into_jobs(self) -> Result<Vec<Job>, ManifestError> {
        let config = self.pipeline_config();
        self.jobs
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let job_id = JobId(index);
                let mut params = self.params.clone();
                params.extend(entry.params.iter().map(|(k, v)| (k.clone(), v.clone())));

                let templates = entry.operations.as_ref().unwrap_or(&self.operations);
                let mut edits = Vec::with_capacity(templates.len());
                for (op_index, template) in templates.iter().enumerate() {
                    let resolved = substitute(template, &params)
                        .map_err(|name| ManifestError::UnknownParameter { job_id, name })?;
                    let edit: EditOperation = serde_json::from_value(resolved).map_err(|source| {
                        ManifestError::InvalidOperation {
                            job_id,
                            index: op_index,
                            source,
                        }
                    })?;
                    edits.push(edit);
                }

                let job = Job::new(
                    entry.input.clone(),
                    entry.output.clone(),
                    Pipeline::from_edits(edits, config),
                );
                Ok(match entry.timeout_ms {
                    Some(ms) => job.with_timeout(Duration::from_millis(ms)),
                    None => job,
                })
            })
            .collect()
    }
}

fn placeholder(text: &str) -> Option<&str> {
    let name = text.strip_prefix("${")?.strip_suffix('}')?;
    (!name.is_empty() && !name.contains(['{', '}', '$'])).then_some(name)
}

/// Replaces whole-string `${name}` placeholders, recursively. Returns the
/// first unknown parameter name on failure.
fn substitute(value: &Value, params: &BTreeMap<String, Value>) -> Result<Value, String> {
    match value {
        Value::String(text) => match placeholder(text) {
            Some(name) => params.get(name).cloned().ok_or_else(|| name.to_string()),
            None => Ok(value.clone()),
        },
        Value::Array(items) => items
            .iter()
            .map(|item| substitute(item, params))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| substitute(v, params).map(|v| (k.clone(), v)))
            .collect::<Result<serde_json::Map<_, _>, _>>()
            .map(Value::Object),
        _ => Ok(value.clone()),
    }
}
