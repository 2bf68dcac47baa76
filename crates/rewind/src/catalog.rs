//! Backup catalog: the on-disk (and optionally object-store-mirrored)
//! inventory of full and incremental backup members.
//!
//! Local layout:
//!
//! ```text
//! {base}/full/{YYYYMMDD_HHMMSS}/          engine snapshot + manifest.json
//! {base}/incremental/{YYYYMMDD_HHMMSS}/
//! {base}/.metadata/latest_full            current-pointer files, replaced
//! {base}/.metadata/latest_incremental     atomically (write-new-then-rename)
//! ```
//!
//! The remote mirror uses `full/backup_{ts}.tar.gz` and
//! `incremental/backup_{ts}.tar.gz` keys. Members that are missing,
//! malformed or unreadable are *unavailable* — skipped with a warning, never
//! an error — so the resolver can fall back to an older full.

use crate::fsutil;
use rewind_core::{
    BackupId, BackupKind, BackupLocation, BackupRecord, ObjectStore, Result, RewindError,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";
/// Marker the snapshot engine writes into every complete member.
pub const SNAPSHOT_MARKER: &str = "xtrabackup_checkpoints";
/// Name of a still-packed member archive inside its member directory.
pub const MEMBER_TARBALL: &str = "backup.tar.gz";

const METADATA_DIR: &str = ".metadata";

pub struct BackupCatalog {
    base_dir: PathBuf,
    records: BTreeMap<BackupId, BackupRecord>,
}

impl BackupCatalog {
    /// Scan the local catalog layout.
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        let mut catalog = Self {
            base_dir,
            records: BTreeMap::new(),
        };
        catalog.scan_kind(BackupKind::Full)?;
        catalog.scan_kind(BackupKind::Incremental)?;
        catalog.link_orphans();
        Ok(catalog)
    }

    fn scan_kind(&mut self, kind: BackupKind) -> Result<()> {
        let dir = self.base_dir.join(kind.dir_name());
        if !dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Ok(id) = name.to_string_lossy().parse::<BackupId>() else {
                continue;
            };
            match self.load_member(kind, id, &entry.path()) {
                Ok(record) => {
                    self.records.insert(id, record);
                }
                Err(e) => {
                    tracing::warn!("skipping unavailable {} backup {}: {}", kind, id, e);
                }
            }
        }
        Ok(())
    }

    fn load_member(&self, kind: BackupKind, id: BackupId, dir: &Path) -> Result<BackupRecord> {
        let manifest_path = dir.join(MANIFEST_FILE);
        if manifest_path.exists() {
            let json = fs::read_to_string(&manifest_path)?;
            let record: BackupRecord = serde_json::from_str(&json)
                .map_err(|e| RewindError::Serialization(e.to_string()))?;
            record.validate()?;
            if record.id != id || record.kind != kind {
                return Err(RewindError::InvalidState(format!(
                    "manifest in {} describes {} {}",
                    dir.display(),
                    record.kind,
                    record.id
                )));
            }
            return Ok(record);
        }

        // Producers that predate the manifest format leave only the snapshot
        // files; synthesize a record from the directory itself. The lineage
        // link is filled in by `link_orphans`.
        let record = BackupRecord {
            id,
            kind,
            created_at: id.instant(),
            predecessor: None,
            location: BackupLocation::Local {
                path: dir.to_path_buf(),
            },
            size_bytes: fsutil::dir_size(dir)?,
            checksum: None,
        };
        Ok(record)
    }

    /// An incremental without a recorded predecessor chains from the newest
    /// full older than itself; one with no such full is unusable.
    fn link_orphans(&mut self) {
        let fulls: Vec<(BackupId, chrono::DateTime<chrono::Utc>)> = self
            .records
            .values()
            .filter(|r| r.kind == BackupKind::Full)
            .map(|r| (r.id, r.created_at))
            .collect();
        let mut drop_ids = Vec::new();
        for record in self.records.values_mut() {
            if record.kind != BackupKind::Incremental || record.predecessor.is_some() {
                continue;
            }
            let base = fulls
                .iter()
                .filter(|(_, at)| *at < record.created_at)
                .max_by_key(|(_, at)| *at);
            match base {
                Some((full_id, _)) => record.predecessor = Some(*full_id),
                None => {
                    tracing::warn!(
                        "incremental {} has no full backup older than itself, ignoring",
                        record.id
                    );
                    drop_ids.push(record.id);
                }
            }
        }
        for id in drop_ids {
            self.records.remove(&id);
        }
    }

    /// Merge records visible in the object-store mirror but absent locally.
    pub async fn merge_remote(&mut self, store: &dyn ObjectStore) -> Result<usize> {
        let mut added = 0;
        for kind in [BackupKind::Full, BackupKind::Incremental] {
            let prefix = format!("{}/", kind.dir_name());
            let keys = store
                .list(&prefix)
                .await
                .map_err(|e| RewindError::CatalogUnavailable(e.to_string()))?;
            for key in keys {
                let Some(id) = parse_member_key(&key, kind) else {
                    continue;
                };
                if self.records.contains_key(&id) {
                    continue;
                }
                self.records.insert(
                    id,
                    BackupRecord {
                        id,
                        kind,
                        created_at: id.instant(),
                        predecessor: None,
                        location: BackupLocation::Remote {
                            bucket: String::new(),
                            key,
                        },
                        size_bytes: 0,
                        checksum: None,
                    },
                );
                added += 1;
            }
        }
        if added > 0 {
            self.link_orphans();
        }
        Ok(added)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn records(&self) -> impl Iterator<Item = &BackupRecord> {
        self.records.values()
    }

    pub fn get(&self, id: BackupId) -> Option<&BackupRecord> {
        self.records.get(&id)
    }

    pub fn fulls(&self) -> impl Iterator<Item = &BackupRecord> {
        self.records
            .values()
            .filter(|r| r.kind == BackupKind::Full)
    }

    /// Incrementals in `full`'s lineage, ascending by creation time.
    pub fn incrementals_of(&self, full: BackupId) -> Vec<&BackupRecord> {
        // BTreeMap iteration is already ascending by id, hence by instant.
        self.records
            .values()
            .filter(|r| r.kind == BackupKind::Incremental && r.predecessor == Some(full))
            .collect()
    }

    /// Directory a member of the given kind and id lives in (or will be
    /// materialized into).
    pub fn member_dir(&self, kind: BackupKind, id: BackupId) -> PathBuf {
        self.base_dir.join(kind.dir_name()).join(id.to_string())
    }

    /// Write a member's manifest into its directory.
    pub fn write_record(&self, record: &BackupRecord) -> Result<()> {
        record.validate()?;
        let dir = self.member_dir(record.kind, record.id);
        fs::create_dir_all(&dir)?;
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| RewindError::Serialization(e.to_string()))?;
        fs::write(dir.join(MANIFEST_FILE), json)?;
        Ok(())
    }

    /// Atomically replace the current-pointer file for `kind`.
    pub fn set_latest(&self, kind: BackupKind, id: BackupId) -> Result<()> {
        let dir = self.base_dir.join(METADATA_DIR);
        fs::create_dir_all(&dir)?;
        let pointer = dir.join(format!("latest_{}", kind.dir_name()));
        let staged = dir.join(format!("latest_{}.tmp", kind.dir_name()));
        fs::write(&staged, format!("{id}\n"))?;
        fs::rename(&staged, &pointer)?;
        Ok(())
    }

    pub fn latest(&self, kind: BackupKind) -> Result<Option<BackupId>> {
        let pointer = self
            .base_dir
            .join(METADATA_DIR)
            .join(format!("latest_{}", kind.dir_name()));
        if !pointer.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&pointer)?;
        Ok(Some(contents.trim().parse()?))
    }
}

fn parse_member_key(key: &str, kind: BackupKind) -> Option<BackupId> {
    let name = key.strip_prefix(kind.dir_name())?.strip_prefix('/')?;
    let ts = name.strip_prefix("backup_")?.strip_suffix(".tar.gz")?;
    ts.parse().ok()
}
