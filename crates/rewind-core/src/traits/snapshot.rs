use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Whether a prepare pass leaves the directory open for further merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareMode {
    /// Replay redo records only; the directory still accepts incremental
    /// merges afterward.
    LogOnly,
    /// Complete all log application. The directory becomes directly
    /// restorable and must not be prepared again.
    Finalize,
}

/// How the assembled image is transferred into the data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    Copy,
    Move,
}

/// The physical snapshot engine (xtrabackup-style binary).
///
/// None of these operations are re-entrant: preparing an already-finalized
/// directory corrupts it, so retries must start from a clean copy.
#[async_trait]
pub trait SnapshotEngine: Send + Sync {
    /// Decompress the engine's internal per-file compression in place.
    /// A no-op for uncompressed members.
    async fn decompress(&self, dir: &Path) -> Result<()>;

    /// Prepare `dir`, optionally merging the delta in `incremental` into it.
    async fn prepare(&self, dir: &Path, incremental: Option<&Path>, mode: PrepareMode)
        -> Result<()>;

    /// Transfer a finalized image into the (empty) data directory.
    async fn apply_to_data_dir(&self, dir: &Path, data_dir: &Path, mode: ApplyMode) -> Result<()>;
}
