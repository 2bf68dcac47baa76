use crate::error::{Result, RewindError};
use async_trait::async_trait;
use std::path::Path;

/// Object storage mirroring the backup catalog under `full/`, `incremental/`
/// and `.metadata/` prefixes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file to `key`.
    async fn put(&self, key: &str, path: &Path) -> Result<()>;

    /// Download `key` to a local file.
    async fn get(&self, key: &str, dest: &Path) -> Result<()>;

    /// List keys under `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete `key` (optional; retention runs elsewhere).
    async fn delete(&self, key: &str) -> Result<()> {
        let _ = key;
        Err(RewindError::Config(
            "delete not supported by this object store".to_string(),
        ))
    }
}
