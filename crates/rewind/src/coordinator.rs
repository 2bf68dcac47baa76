//! Restore coordinator: drives a single point-in-time restore from chain
//! resolution through replay verification.
//!
//! A restore is a one-way trip through fixed stages. There is no checkpoint
//! and no resume; a failure leaves the stage name in the error and the
//! on-disk leftovers (work directory, displaced data directory, replay
//! artifact) in place for the operator. The previous data directory is moved
//! aside, never deleted, and its log files double as the archival copy the
//! replay window is read from.

use crate::applier::{ReplayApplier, ReplayOutcome};
use crate::assembler::SnapshotAssembler;
use crate::binlog::{EventParser, LogWindowExtractor, ScriptGenerator};
use crate::catalog::BackupCatalog;
use crate::fetch::MemberFetcher;
use crate::resolver::{resolve_chain, ChainPin};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rewind_core::{
    ApplyMode, BackupId, BinlogReader, DatabaseEngine, LogWindow, ObjectStore, RestoreConfig,
    Result, RewindError, SnapshotEngine, SqlError,
};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// The stages a restore passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStage {
    ResolveChain,
    FetchChain,
    AssembleSnapshot,
    StopEngine,
    ReplaceDataDir,
    StartEngine,
    ExtractWindow,
    GenerateScript,
    ApplyReplay,
    Verify,
}

impl fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestoreStage::ResolveChain => "resolve-chain",
            RestoreStage::FetchChain => "fetch-chain",
            RestoreStage::AssembleSnapshot => "assemble-snapshot",
            RestoreStage::StopEngine => "stop-engine",
            RestoreStage::ReplaceDataDir => "replace-data-dir",
            RestoreStage::StartEngine => "start-engine",
            RestoreStage::ExtractWindow => "extract-window",
            RestoreStage::GenerateScript => "generate-script",
            RestoreStage::ApplyReplay => "apply-replay",
            RestoreStage::Verify => "verify",
        };
        f.write_str(name)
    }
}

/// A restore failure, tagged with the stage it happened in.
#[derive(Debug, thiserror::Error)]
#[error("restore failed during {stage}: {source}")]
pub struct RestoreError {
    pub stage: RestoreStage,
    #[source]
    pub source: RewindError,
}

impl RestoreError {
    fn new(stage: RestoreStage, source: RewindError) -> Self {
        Self { stage, source }
    }
}

/// What a completed restore did.
#[derive(Debug)]
pub struct RestoreReport {
    pub target_time: DateTime<Utc>,
    pub full: BackupId,
    pub incrementals: Vec<BackupId>,
    pub window: LogWindow,
    pub script_path: Option<PathBuf>,
    pub outcome: ReplayOutcome,
    pub displaced_data_dir: PathBuf,
    pub elapsed: std::time::Duration,
}

impl RestoreReport {
    /// Serialize the report for audit.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let value = serde_json::json!({
            "target_time": self.target_time.to_rfc3339(),
            "full": self.full.to_string(),
            "incrementals": self.incrementals.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
            "window": {
                "from": self.window.from.to_rfc3339(),
                "to": self.window.to.to_rfc3339(),
                "source_files": self.window.source_files.iter()
                    .map(|f| f.path.display().to_string())
                    .collect::<Vec<_>>(),
            },
            "script_path": self.script_path.as_ref().map(|p| p.display().to_string()),
            "outcome": {
                "applied": self.outcome.applied,
                "already_exists": self.outcome.already_exists,
                "record_not_found": self.outcome.record_not_found,
            },
            "displaced_data_dir": self.displaced_data_dir.display().to_string(),
            "elapsed_seconds": self.elapsed.as_secs_f64(),
        });
        let json = serde_json::to_string_pretty(&value)
            .map_err(|e| RewindError::Serialization(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Exclusive-restore lock file, released on drop.
#[derive(Debug)]
struct RestoreLock {
    path: PathBuf,
}

impl RestoreLock {
    fn acquire(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(RewindError::Lock(format!(
                    "another restore is running (lock file {} exists)",
                    path.display()
                )))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for RestoreLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("failed to remove lock file {}: {}", self.path.display(), e);
        }
    }
}

pub struct RestoreCoordinator {
    config: RestoreConfig,
    snapshot: Arc<dyn SnapshotEngine>,
    database: Arc<dyn DatabaseEngine>,
    reader: Arc<dyn BinlogReader>,
    store: Option<Arc<dyn ObjectStore>>,
}

impl RestoreCoordinator {
    pub fn new(
        config: RestoreConfig,
        snapshot: Arc<dyn SnapshotEngine>,
        database: Arc<dyn DatabaseEngine>,
        reader: Arc<dyn BinlogReader>,
        store: Option<Arc<dyn ObjectStore>>,
    ) -> Self {
        Self {
            config,
            snapshot,
            database,
            reader,
            store,
        }
    }

    /// Run a full restore to `target_time`.
    pub async fn restore(
        &self,
        target_time: DateTime<Utc>,
        pin: &ChainPin,
    ) -> std::result::Result<RestoreReport, RestoreError> {
        let started = Instant::now();
        let stamp = target_time.format("%Y%m%d_%H%M%S");

        self.config
            .validate()
            .map_err(|e| RestoreError::new(RestoreStage::ResolveChain, e))?;
        // Exclusivity is per data directory: two restores with different
        // catalogs must still serialize on the same target. The lock is a
        // sibling of the data dir so the rename-aside does not carry it away.
        let lock_file = lock_path(&self.config.data_dir)
            .map_err(|e| RestoreError::new(RestoreStage::ResolveChain, e))?;
        let _lock = RestoreLock::acquire(lock_file)
            .map_err(|e| RestoreError::new(RestoreStage::ResolveChain, e))?;

        tracing::info!("stage {}", RestoreStage::ResolveChain);
        let mut catalog = BackupCatalog::open(&self.config.backup_base_dir)
            .map_err(|e| RestoreError::new(RestoreStage::ResolveChain, e))?;
        if let Some(store) = &self.store {
            catalog
                .merge_remote(store.as_ref())
                .await
                .map_err(|e| RestoreError::new(RestoreStage::ResolveChain, e))?;
        }
        let chain = resolve_chain(&catalog, target_time, pin)
            .map_err(|e| RestoreError::new(RestoreStage::ResolveChain, e))?;

        tracing::info!("stage {}", RestoreStage::FetchChain);
        let fetcher = MemberFetcher::new(self.store.clone(), self.config.download_workers);
        let materialized = fetcher
            .materialize_chain(&catalog, &chain)
            .await
            .map_err(|e| RestoreError::new(RestoreStage::FetchChain, e))?;

        tracing::info!("stage {}", RestoreStage::AssembleSnapshot);
        let work_dir = self
            .config
            .backup_base_dir
            .join(format!("restore_work_{stamp}"));
        let assembled = SnapshotAssembler::new(self.snapshot.as_ref())
            .assemble(&chain, &materialized, &work_dir)
            .await
            .map_err(|e| RestoreError::new(RestoreStage::AssembleSnapshot, e))?;

        tracing::info!("stage {}", RestoreStage::StopEngine);
        self.database
            .stop()
            .await
            .map_err(|e| RestoreError::new(RestoreStage::StopEngine, e))?;

        tracing::info!("stage {}", RestoreStage::ReplaceDataDir);
        let displaced = self
            .replace_data_dir(&assembled, &stamp.to_string())
            .await
            .map_err(|e| RestoreError::new(RestoreStage::ReplaceDataDir, e))?;

        tracing::info!("stage {}", RestoreStage::StartEngine);
        self.database
            .start()
            .await
            .map_err(|e| RestoreError::new(RestoreStage::StartEngine, e))?;
        self.database
            .wait_ready(self.config.engine_ready_timeout)
            .await
            .map_err(|e| RestoreError::new(RestoreStage::StartEngine, e))?;

        tracing::info!("stage {}", RestoreStage::ExtractWindow);
        let from = chain.last_member().created_at;
        let mut search_dirs = vec![displaced.clone()];
        search_dirs.extend(self.config.binlog_dirs.iter().cloned());
        let extractor = LogWindowExtractor::new(search_dirs, &self.config.binlog_index_name);
        let window = extractor
            .extract(self.reader.as_ref(), from, target_time)
            .await
            .map_err(|e| RestoreError::new(RestoreStage::ExtractWindow, e))?;

        let (script_path, outcome) = if window.is_empty_interval() {
            tracing::info!("target time equals the last chain member, skipping replay");
            (None, ReplayOutcome::default())
        } else {
            tracing::info!("stage {}", RestoreStage::GenerateScript);
            let files: Vec<PathBuf> =
                window.source_files.iter().map(|f| f.path.clone()).collect();
            // Coarse stop filter, one second past the target; the generator
            // enforces the exact boundary.
            let lines = self
                .reader
                .read_events(&files, Some(from), target_time + ChronoDuration::seconds(1))
                .await
                .map_err(|e| RestoreError::new(RestoreStage::GenerateScript, e))?;
            let mut parser = EventParser::new();
            for line in &lines {
                parser
                    .push_line(line)
                    .map_err(|e| RestoreError::new(RestoreStage::GenerateScript, e))?;
            }
            let events = parser
                .finish()
                .map_err(|e| RestoreError::new(RestoreStage::GenerateScript, e))?;
            let artifact = ScriptGenerator::new(&self.config.backup_base_dir)
                .generate(&events, &window)
                .map_err(|e| RestoreError::new(RestoreStage::GenerateScript, e))?;

            tracing::info!("stage {}", RestoreStage::ApplyReplay);
            let outcome = ReplayApplier::apply(self.database.as_ref(), &artifact)
                .await
                .map_err(|e| RestoreError::new(RestoreStage::ApplyReplay, e))?;
            (Some(artifact.path), outcome)
        };

        tracing::info!("stage {}", RestoreStage::Verify);
        self.verify()
            .await
            .map_err(|e| RestoreError::new(RestoreStage::Verify, e))?;

        let report = RestoreReport {
            target_time,
            full: chain.full.id,
            incrementals: chain.incrementals.iter().map(|r| r.id).collect(),
            window,
            script_path,
            outcome,
            displaced_data_dir: displaced,
            elapsed: started.elapsed(),
        };
        // Audit record next to the catalog; failure to write it does not
        // fail an otherwise complete restore.
        let report_path = self
            .config
            .backup_base_dir
            .join(format!("pitr_report_{stamp}.json"));
        if let Err(e) = report.write_json(&report_path) {
            tracing::warn!("failed to write {}: {}", report_path.display(), e);
        }
        tracing::info!(
            "restore complete in {:.1}s: full {} + {} incremental(s), {} statement(s) applied",
            report.elapsed.as_secs_f64(),
            report.full,
            report.incrementals.len(),
            report.outcome.applied
        );
        Ok(report)
    }

    /// Move the live data directory aside and install the assembled image.
    /// The displaced directory keeps the pre-restore log files; it is the
    /// archival copy the replay window is read from.
    async fn replace_data_dir(&self, assembled: &Path, stamp: &str) -> Result<PathBuf> {
        let data_dir = &self.config.data_dir;
        let displaced = displaced_path(data_dir, stamp)?;
        if data_dir.exists() {
            fs::rename(data_dir, &displaced)?;
            tracing::info!(
                "moved {} aside to {}",
                data_dir.display(),
                displaced.display()
            );
        } else {
            fs::create_dir_all(&displaced)?;
        }
        fs::create_dir_all(data_dir)?;

        self.snapshot
            .apply_to_data_dir(assembled, data_dir, ApplyMode::Copy)
            .await?;

        // The snapshot may carry log files from backup time; drop them, then
        // put the pre-restore tail back so the server resumes its own log
        // lineage where it left off.
        for entry in fs::read_dir(data_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy().into_owned();
            if rewind_core::BinlogFile::from_path(&entry.path()).is_some()
                || name == self.config.binlog_index_name
            {
                fs::remove_file(entry.path())?;
            }
        }
        for entry in fs::read_dir(&displaced)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy().into_owned();
            if rewind_core::BinlogFile::from_path(&entry.path()).is_some()
                || name == self.config.binlog_index_name
            {
                fs::copy(entry.path(), data_dir.join(&name))?;
            }
        }
        Ok(displaced)
    }

    async fn verify(&self) -> Result<()> {
        self.database
            .execute_sql("SELECT 1;")
            .await
            .map_err(|e: SqlError| {
                RewindError::Engine(format!("verification probe failed: {e}"))
            })
    }
}

fn lock_path(data_dir: &Path) -> Result<PathBuf> {
    let name = data_dir
        .file_name()
        .ok_or_else(|| RewindError::Config("data dir has no final component".into()))?;
    let parent = data_dir
        .parent()
        .ok_or_else(|| RewindError::Config("data dir has no parent".into()))?;
    Ok(parent.join(format!("{}.restore.lock", name.to_string_lossy())))
}

fn displaced_path(data_dir: &Path, stamp: &str) -> Result<PathBuf> {
    let name = data_dir
        .file_name()
        .ok_or_else(|| RewindError::Config("data dir has no final component".into()))?;
    let parent = data_dir
        .parent()
        .ok_or_else(|| RewindError::Config("data dir has no parent".into()))?;
    Ok(parent.join(format!("{}_old_{stamp}", name.to_string_lossy())))
}
