//! File-backed rule store for production use.
//!
//! The record lives in a single JSON document (`communityRules.cache.json` by
//! default). Writes go to a uniquely named sibling temp file which is synced
//! and then renamed over the target, so a crash, a power loss or a concurrent
//! writer leaves either the previous record or the new one, never a mix.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;

use crate::rules::CacheRecord;
use super::RuleStore;

/// Default file name of the cache record.
pub const CACHE_FILE_NAME: &str = "communityRules.cache.json";

/// Error type for the file store.
#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    /// Filesystem failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The stored document does not decode as a cache record.
    #[error("Corrupt cache record at {path}: {source}")]
    Corrupt {
        /// Path of the record.
        path: PathBuf,
        /// Decode error.
        source: serde_json::Error,
    },
    /// Record could not be encoded.
    #[error("Failed to encode cache record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Rule store persisting the record as one JSON file.
#[derive(Debug, Clone)]
pub struct FileRuleStore {
    path: PathBuf,
}

impl FileRuleStore {
    /// Store the record at an explicit path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store the record under `dir` with the default file name.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(CACHE_FILE_NAME))
    }

    /// Path of the record file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fresh temp path next to the record, unique per process and write.
    fn temp_path(&self) -> PathBuf {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        self.path
            .with_extension(format!("json.{}.{n}.tmp", std::process::id()))
    }

    async fn write_synced(&self, tmp: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = tokio::fs::File::create(tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await
    }

    fn io_err(&self, source: std::io::Error) -> FileStoreError {
        FileStoreError::Io { path: self.path.clone(), source }
    }
}

#[async_trait]
impl RuleStore for FileRuleStore {
    type Error = FileStoreError;

    async fn load(&self) -> Result<Option<CacheRecord>, Self::Error> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };
        let record = serde_json::from_slice(&bytes).map_err(|source| FileStoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(record))
    }

    async fn save(&self, record: &CacheRecord) -> Result<(), Self::Error> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| self.io_err(e))?;
        }

        let bytes = serde_json::to_vec_pretty(record)?;
        let tmp = self.temp_path();
        let written = match self.write_synced(&tmp, &bytes).await {
            Ok(()) => tokio::fs::rename(&tmp, &self.path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.io_err(e));
        }
        sync_parent(&self.path).await;

        tracing::info!(
            path = %self.path.display(),
            rule_count = record.rule_count,
            "Persisted rule cache record"
        );
        Ok(())
    }
}

/// Persist the rename itself. Best effort: not every platform can open a
/// directory for syncing.
async fn sync_parent(path: &Path) {
    let Some(parent) = path.parent() else { return };
    #[cfg(unix)]
    {
        let synced = match tokio::fs::File::open(parent).await {
            Ok(dir) => dir.sync_all().await,
            Err(e) => Err(e),
        };
        if let Err(e) = synced {
            tracing::debug!(path = %parent.display(), error = %e, "Directory sync failed");
        }
    }
    #[cfg(not(unix))]
    let _ = parent;
}
