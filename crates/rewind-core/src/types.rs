//! Catalog and chain data model.
//!
//! Backup identifiers are derived from the producer's UTC clock and render as
//! `YYYYMMDD_HHMMSS`, which is also the on-disk directory name of a backup
//! member. String ordering of ids therefore matches instant ordering.

use crate::error::{Result, RewindError};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const BACKUP_ID_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Timestamp-derived backup identifier, second precision, UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackupId(DateTime<Utc>);

impl BackupId {
    pub fn from_instant(at: DateTime<Utc>) -> Self {
        // Truncate to whole seconds so id -> instant -> id round-trips.
        Self(Utc.timestamp_opt(at.timestamp(), 0).unwrap())
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(BACKUP_ID_FORMAT))
    }
}

impl FromStr for BackupId {
    type Err = RewindError;

    fn from_str(s: &str) -> Result<Self> {
        let naive = NaiveDateTime::parse_from_str(s, BACKUP_ID_FORMAT)
            .map_err(|e| RewindError::Parse(format!("invalid backup id {s:?}: {e}")))?;
        Ok(Self(Utc.from_utc_datetime(&naive)))
    }
}

impl Serialize for BackupId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BackupId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Full,
    Incremental,
}

impl BackupKind {
    /// Directory name under the catalog base for this kind.
    pub fn dir_name(&self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "incremental",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Where a backup member's bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum BackupLocation {
    Local { path: PathBuf },
    Remote { bucket: String, key: String },
}

/// Metadata for one full or incremental backup member.
///
/// Created by the backup producer after a successful snapshot, read-only
/// afterward. A missing member is "unavailable", never an error by itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: BackupId,
    pub kind: BackupKind,
    pub created_at: DateTime<Utc>,
    /// For incrementals, the full backup this member chains from.
    pub predecessor: Option<BackupId>,
    pub location: BackupLocation,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl BackupRecord {
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            BackupKind::Full => {
                if self.predecessor.is_some() {
                    return Err(RewindError::InvalidState(format!(
                        "full backup {} must not have a predecessor",
                        self.id
                    )));
                }
            }
            BackupKind::Incremental => {
                let pred = self.predecessor.ok_or_else(|| {
                    RewindError::InvalidState(format!(
                        "incremental backup {} has no predecessor",
                        self.id
                    ))
                })?;
                if self.created_at <= pred.instant() {
                    return Err(RewindError::InvalidState(format!(
                        "incremental backup {} is not newer than its predecessor {}",
                        self.id, pred
                    )));
                }
            }
        }
        Ok(())
    }
}

/// The ordered lineage selected to reconstruct state as of `target_time`.
/// Built fresh for each restore invocation, never persisted.
#[derive(Debug, Clone)]
pub struct RestoreChain {
    pub full: BackupRecord,
    pub incrementals: Vec<BackupRecord>,
    pub target_time: DateTime<Utc>,
}

impl RestoreChain {
    /// The newest member of the chain; its `created_at` is where binlog
    /// replay takes over.
    pub fn last_member(&self) -> &BackupRecord {
        self.incrementals.last().unwrap_or(&self.full)
    }

    pub fn validate(&self) -> Result<()> {
        self.full.validate()?;
        if self.full.kind != BackupKind::Full {
            return Err(RewindError::InvalidState(format!(
                "chain base {} is not a full backup",
                self.full.id
            )));
        }
        if self.full.created_at > self.target_time {
            return Err(RewindError::InvalidState(format!(
                "full backup {} is newer than target time {}",
                self.full.id, self.target_time
            )));
        }
        let mut prev = self.full.created_at;
        for inc in &self.incrementals {
            inc.validate()?;
            if inc.kind != BackupKind::Incremental {
                return Err(RewindError::InvalidState(format!(
                    "chain member {} is not an incremental backup",
                    inc.id
                )));
            }
            if inc.predecessor != Some(self.full.id) {
                return Err(RewindError::InvalidState(format!(
                    "incremental {} belongs to a different lineage (predecessor {:?})",
                    inc.id, inc.predecessor
                )));
            }
            if inc.created_at <= prev {
                return Err(RewindError::InvalidState(format!(
                    "chain is not strictly increasing at {}",
                    inc.id
                )));
            }
            if inc.created_at > self.target_time {
                return Err(RewindError::InvalidState(format!(
                    "incremental {} is newer than target time {}",
                    inc.id, self.target_time
                )));
            }
            prev = inc.created_at;
        }
        Ok(())
    }
}

/// One write-ahead log file, identified by its intrinsic sequence number.
///
/// Ordering and deduplication go by sequence number, never by path string:
/// the same segment can be visible both in the data directory and in an
/// archival copy, and filesystem listing order is not monotonic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinlogFile {
    pub path: PathBuf,
    pub sequence: u64,
}

impl BinlogFile {
    /// Parse the sequence number from a `<stem>.<NNNNNN>` file name.
    /// Returns `None` for index files and anything else without a numeric
    /// suffix.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        if ext.is_empty() || !ext.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let sequence = ext.parse().ok()?;
        Some(Self {
            path: path.to_path_buf(),
            sequence,
        })
    }
}

/// The replay interval and the ordered log files covering it.
#[derive(Debug, Clone)]
pub struct LogWindow {
    /// `created_at` of the last chain member. Inclusive; events the base
    /// image already contains replay as non-fatal duplicates.
    pub from: DateTime<Utc>,
    /// The target instant. Inclusive.
    pub to: DateTime<Utc>,
    /// Ordered by sequence number, deduplicated.
    pub source_files: Vec<BinlogFile>,
}

impl LogWindow {
    pub fn is_empty_interval(&self) -> bool {
        self.from >= self.to
    }
}
