//! Snapshot assembler: merges a materialized chain into one consistent,
//! directly restorable base image.
//!
//! The sequence mirrors the snapshot engine's contract: prepare the full
//! with log-only mode (internally consistent but still mergeable), merge
//! each incremental in chain order with log-only mode, then one final
//! prepare to finalize. The engine's prepare is not re-entrant on a
//! finalized directory, so a non-empty work directory is rejected rather
//! than reused, and a failed run's work directory must be discarded.

use crate::catalog::SNAPSHOT_MARKER;
use crate::fetch::MaterializedChain;
use crate::fsutil;
use rewind_core::{PrepareMode, Result, RestoreChain, RewindError, SnapshotEngine};
use std::path::{Path, PathBuf};

pub struct SnapshotAssembler<'a> {
    engine: &'a dyn SnapshotEngine,
}

impl<'a> SnapshotAssembler<'a> {
    pub fn new(engine: &'a dyn SnapshotEngine) -> Self {
        Self { engine }
    }

    /// Assemble `chain` into `work_dir`, which must be empty or absent.
    pub async fn assemble(
        &self,
        chain: &RestoreChain,
        materialized: &MaterializedChain,
        work_dir: &Path,
    ) -> Result<PathBuf> {
        if !fsutil::dir_is_empty(work_dir)? {
            return Err(RewindError::InvalidState(format!(
                "work directory {} is not empty; assembly is not re-entrant, wipe it first",
                work_dir.display()
            )));
        }
        if materialized.incremental_dirs.len() != chain.incrementals.len() {
            return Err(RewindError::InvalidState(format!(
                "materialized chain has {} incrementals, resolver selected {}",
                materialized.incremental_dirs.len(),
                chain.incrementals.len()
            )));
        }

        tracing::info!(
            "assembling full {} into {}",
            chain.full.id,
            work_dir.display()
        );
        fsutil::copy_dir_recursive(&materialized.full_dir, work_dir)?;
        self.check_member_complete(work_dir, "full base")?;

        self.engine
            .decompress(work_dir)
            .await
            .map_err(|e| assembly_failed("decompress of full base", e))?;
        self.engine
            .prepare(work_dir, None, PrepareMode::LogOnly)
            .await
            .map_err(|e| assembly_failed("prepare of full base", e))?;

        for (record, dir) in chain.incrementals.iter().zip(&materialized.incremental_dirs) {
            tracing::info!("merging incremental {}", record.id);
            // Merge from a scratch copy; the prepare mutates the incremental
            // source, and the catalog member must stay pristine for the next
            // restore.
            let scratch = tempfile::tempdir_in(
                work_dir
                    .parent()
                    .ok_or_else(|| RewindError::InvalidState("work dir has no parent".into()))?,
            )?;
            fsutil::copy_dir_recursive(dir, scratch.path())?;
            self.check_member_complete(scratch.path(), "incremental")?;
            self.engine
                .decompress(scratch.path())
                .await
                .map_err(|e| assembly_failed("decompress of incremental", e))?;
            self.engine
                .prepare(work_dir, Some(scratch.path()), PrepareMode::LogOnly)
                .await
                .map_err(|e| assembly_failed(&format!("merge of incremental {}", record.id), e))?;
        }

        tracing::info!("finalizing base image");
        self.engine
            .prepare(work_dir, None, PrepareMode::Finalize)
            .await
            .map_err(|e| assembly_failed("final prepare", e))?;

        Ok(work_dir.to_path_buf())
    }

    fn check_member_complete(&self, dir: &Path, what: &str) -> Result<()> {
        if !dir.join(SNAPSHOT_MARKER).exists() {
            return Err(RewindError::AssemblyFailed(format!(
                "{} in {} is incomplete (no {} marker)",
                what,
                dir.display(),
                SNAPSHOT_MARKER
            )));
        }
        Ok(())
    }
}

fn assembly_failed(stage: &str, err: RewindError) -> RewindError {
    RewindError::AssemblyFailed(format!("{stage}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rewind_core::{ApplyMode, BackupId, BackupKind, BackupLocation, BackupRecord};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records prepare invocations instead of running a real engine.
    #[derive(Default)]
    struct RecordingEngine {
        calls: Mutex<Vec<String>>,
        fail_on_finalize: bool,
    }

    #[async_trait]
    impl SnapshotEngine for RecordingEngine {
        async fn decompress(&self, _dir: &Path) -> Result<()> {
            self.calls.lock().unwrap().push("decompress".into());
            Ok(())
        }

        async fn prepare(
            &self,
            _dir: &Path,
            incremental: Option<&Path>,
            mode: PrepareMode,
        ) -> Result<()> {
            let call = match (incremental, mode) {
                (None, PrepareMode::LogOnly) => "prepare-log-only".to_string(),
                (Some(_), PrepareMode::LogOnly) => "merge".to_string(),
                (None, PrepareMode::Finalize) => "finalize".to_string(),
                (Some(_), PrepareMode::Finalize) => "merge-finalize".to_string(),
            };
            self.calls.lock().unwrap().push(call);
            if self.fail_on_finalize && mode == PrepareMode::Finalize {
                return Err(RewindError::Engine("redo apply failed".into()));
            }
            Ok(())
        }

        async fn apply_to_data_dir(
            &self,
            _dir: &Path,
            _data_dir: &Path,
            _mode: ApplyMode,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn member_dir(base: &Path, name: &str) -> PathBuf {
        let dir = base.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(SNAPSHOT_MARKER), b"").unwrap();
        fs::write(dir.join("ibdata1"), b"pages").unwrap();
        dir
    }

    fn record(kind: BackupKind, ts: &str, pred: Option<&str>) -> BackupRecord {
        let id: BackupId = ts.parse().unwrap();
        BackupRecord {
            id,
            kind,
            created_at: id.instant(),
            predecessor: pred.map(|p| p.parse().unwrap()),
            location: BackupLocation::Local {
                path: PathBuf::new(),
            },
            size_bytes: 0,
            checksum: None,
        }
    }

    fn chain_with_incs(incs: &[&str]) -> RestoreChain {
        let full = record(BackupKind::Full, "20251126_020000", None);
        let incrementals = incs
            .iter()
            .map(|ts| record(BackupKind::Incremental, ts, Some("20251126_020000")))
            .collect::<Vec<_>>();
        let target_time = incrementals
            .last()
            .map(|r| r.created_at)
            .unwrap_or(full.created_at)
            + chrono::Duration::hours(1);
        RestoreChain {
            full,
            incrementals,
            target_time,
        }
    }

    #[tokio::test]
    async fn assembly_runs_prepare_sequence_in_order() {
        let base = TempDir::new().unwrap();
        let materialized = MaterializedChain {
            full_dir: member_dir(base.path(), "full_member"),
            incremental_dirs: vec![
                member_dir(base.path(), "inc1"),
                member_dir(base.path(), "inc2"),
            ],
        };
        let chain = chain_with_incs(&["20251126_030000", "20251126_040000"]);
        let engine = RecordingEngine::default();
        let work_dir = base.path().join("work");

        SnapshotAssembler::new(&engine)
            .assemble(&chain, &materialized, &work_dir)
            .await
            .unwrap();

        let calls = engine.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                "decompress",
                "prepare-log-only",
                "decompress",
                "merge",
                "decompress",
                "merge",
                "finalize"
            ]
        );
        assert!(work_dir.join("ibdata1").exists());
    }

    #[tokio::test]
    async fn non_empty_work_dir_is_rejected() {
        let base = TempDir::new().unwrap();
        let materialized = MaterializedChain {
            full_dir: member_dir(base.path(), "full_member"),
            incremental_dirs: Vec::new(),
        };
        let chain = chain_with_incs(&[]);
        let work_dir = base.path().join("work");
        fs::create_dir_all(&work_dir).unwrap();
        fs::write(work_dir.join("leftover"), b"stale").unwrap();

        let engine = RecordingEngine::default();
        let err = SnapshotAssembler::new(&engine)
            .assemble(&chain, &materialized, &work_dir)
            .await
            .unwrap_err();
        assert!(matches!(err, RewindError::InvalidState(_)));
        assert!(engine.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn engine_failure_is_assembly_failed() {
        let base = TempDir::new().unwrap();
        let materialized = MaterializedChain {
            full_dir: member_dir(base.path(), "full_member"),
            incremental_dirs: Vec::new(),
        };
        let chain = chain_with_incs(&[]);
        let engine = RecordingEngine {
            fail_on_finalize: true,
            ..Default::default()
        };
        let err = SnapshotAssembler::new(&engine)
            .assemble(&chain, &materialized, &base.path().join("work"))
            .await
            .unwrap_err();
        assert!(matches!(err, RewindError::AssemblyFailed(_)));
    }

    #[tokio::test]
    async fn incomplete_member_fails_before_any_prepare() {
        let base = TempDir::new().unwrap();
        let full_dir = base.path().join("full_member");
        fs::create_dir_all(&full_dir).unwrap();
        // no snapshot marker
        fs::write(full_dir.join("ibdata1"), b"pages").unwrap();
        let materialized = MaterializedChain {
            full_dir,
            incremental_dirs: Vec::new(),
        };
        let chain = chain_with_incs(&[]);
        let engine = RecordingEngine::default();
        let err = SnapshotAssembler::new(&engine)
            .assemble(&chain, &materialized, &base.path().join("work"))
            .await
            .unwrap_err();
        assert!(matches!(err, RewindError::AssemblyFailed(_)));
        assert!(engine.calls.lock().unwrap().is_empty());
    }
}
