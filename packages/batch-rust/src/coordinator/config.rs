//! Batch configuration, captured once when a batch is constructed.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-batch settings. Immutable once a [`BatchRun`](super::BatchRun) is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Number of concurrent workers (W). Must be at least 1.
    pub worker_count: usize,
    /// When `false`, the first failed job cancels everything still queued.
    pub continue_on_error: bool,
    /// Timeout for jobs that do not set their own.
    #[serde(with = "opt_millis")]
    pub default_job_timeout: Option<Duration>,
    /// Write the output of pipelines that ended `PartiallyCommitted`.
    pub save_partial_commits: bool,
    /// Write documents even when no operation changed them.
    pub write_unmodified: bool,
    /// When set, a job that writes over its own input first copies the
    /// input into this directory.
    pub backup_dir: Option<PathBuf>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            continue_on_error: true,
            default_job_timeout: None,
            save_partial_commits: true,
            write_unmodified: true,
            backup_dir: None,
        }
    }
}

impl BatchConfig {
    #[must_use]
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    #[must_use]
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_job_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_batch_mode() {
        let config = BatchConfig::default();
        assert_eq!(config.worker_count, 4);
        assert!(config.continue_on_error);
        assert!(config.default_job_timeout.is_none());
        assert!(config.save_partial_commits);
        assert!(config.write_unmodified);
        assert!(config.backup_dir.is_none());
    }

    #[test]
    fn timeout_serializes_as_millis() {
        let config = BatchConfig::default()
            .with_workers(2)
            .with_default_timeout(Duration::from_millis(1500));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["default_job_timeout"], 1500);

        let parsed: BatchConfig = serde_json::from_str(r#"{"worker_count": 8}"#).unwrap();
        assert_eq!(parsed.worker_count, 8);
        assert!(parsed.continue_on_error);
        assert_eq!(parsed.default_job_timeout, None);
    }
}
