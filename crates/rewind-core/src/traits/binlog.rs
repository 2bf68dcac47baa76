use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// The binlog reader binary (mysqlbinlog-style).
///
/// All timestamps crossing this seam are UTC; the reader's own decoded
/// output also carries UTC epochs. Callers never hand it local time.
#[async_trait]
pub trait BinlogReader: Send + Sync {
    /// The [first, last] event timestamps of one log file.
    async fn time_span(&self, file: &Path) -> Result<(DateTime<Utc>, DateTime<Utc>)>;

    /// Decode events from `files` (in the given order) into the reader's
    /// verbose text form, coarsely pre-filtered to `[start, stop)`. The
    /// filter is second-granular and inclusive of in-flight transactions;
    /// exact boundary decisions belong to the script generator.
    async fn read_events(
        &self,
        files: &[PathBuf],
        start: Option<DateTime<Utc>>,
        stop: DateTime<Utc>,
    ) -> Result<Vec<String>>;
}
