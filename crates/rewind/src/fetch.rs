//! Member fetcher: makes every chain member present and extracted on local
//! disk before assembly.
//!
//! Each member resolves in order of preference: an already-extracted member
//! directory, a local `backup.tar.gz` waiting to be unpacked, or a download
//! from the object-store mirror. Downloads of distinct members are
//! independent read-only transfers, so they run concurrently through a
//! bounded worker pool — the only concurrency in the restore flow.

use crate::catalog::{BackupCatalog, MEMBER_TARBALL, SNAPSHOT_MARKER};
use crate::fsutil;
use rewind_core::{
    BackupKind, BackupLocation, BackupRecord, ObjectStore, RestoreChain, Result, RewindError,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;

pub struct MemberFetcher {
    store: Option<Arc<dyn ObjectStore>>,
    workers: usize,
}

/// Local, extracted directories for the chain: the full first, then each
/// incremental in chain order.
#[derive(Debug)]
pub struct MaterializedChain {
    pub full_dir: PathBuf,
    pub incremental_dirs: Vec<PathBuf>,
}

impl MemberFetcher {
    pub fn new(store: Option<Arc<dyn ObjectStore>>, workers: usize) -> Self {
        Self {
            store,
            workers: workers.max(1),
        }
    }

    pub async fn materialize_chain(
        &self,
        catalog: &BackupCatalog,
        chain: &RestoreChain,
    ) -> Result<MaterializedChain> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut handles = Vec::new();

        let mut members = vec![chain.full.clone()];
        members.extend(chain.incrementals.iter().cloned());

        for member in members {
            let dir = catalog.member_dir(member.kind, member.id);
            let store = self.store.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| RewindError::InvalidState(e.to_string()))?;
                materialize_member(&member, dir, store).await
            }));
        }

        let mut dirs = Vec::with_capacity(handles.len());
        for handle in handles {
            let dir = handle
                .await
                .map_err(|e| RewindError::InvalidState(format!("fetch task panicked: {e}")))??;
            dirs.push(dir);
        }

        let mut iter = dirs.into_iter();
        let full_dir = iter.next().expect("chain has a full member");
        Ok(MaterializedChain {
            full_dir,
            incremental_dirs: iter.collect(),
        })
    }
}

async fn materialize_member(
    member: &BackupRecord,
    dir: PathBuf,
    store: Option<Arc<dyn ObjectStore>>,
) -> Result<PathBuf> {
    if dir.join(SNAPSHOT_MARKER).exists() {
        tracing::debug!("{} {} already extracted", member.kind, member.id);
        return Ok(dir);
    }

    let tarball = dir.join(MEMBER_TARBALL);
    if tarball.exists() {
        tracing::info!("unpacking local archive for {} {}", member.kind, member.id);
        unpack_into(&tarball, &dir).await?;
        return verify_extracted(member, dir);
    }

    let Some(store) = store else {
        return Err(RewindError::CatalogUnavailable(format!(
            "{} backup {} is not present locally and no object store is configured",
            member.kind, member.id
        )));
    };
    let key = remote_key(member);
    tracing::info!(
        "downloading {} {} from object store ({})",
        member.kind,
        member.id,
        key
    );
    std::fs::create_dir_all(&dir)?;
    store
        .get(&key, &tarball)
        .await
        .map_err(|e| RewindError::CatalogUnavailable(format!("download of {key} failed: {e}")))?;
    unpack_into(&tarball, &dir).await?;
    verify_extracted(member, dir)
}

fn remote_key(member: &BackupRecord) -> String {
    match &member.location {
        BackupLocation::Remote { key, .. } if !key.is_empty() => key.clone(),
        _ => format!(
            "{}/backup_{}.tar.gz",
            member.kind.dir_name(),
            member.id
        ),
    }
}

async fn unpack_into(tarball: &PathBuf, dir: &PathBuf) -> Result<()> {
    let tarball = tarball.clone();
    let dir = dir.clone();
    tokio::task::spawn_blocking(move || fsutil::unpack_tarball(&tarball, &dir))
        .await
        .map_err(|e| RewindError::InvalidState(format!("unpack task panicked: {e}")))?
}

fn verify_extracted(member: &BackupRecord, dir: PathBuf) -> Result<PathBuf> {
    if !dir.join(SNAPSHOT_MARKER).exists() {
        return Err(RewindError::CatalogUnavailable(format!(
            "{} backup {} is incomplete after extraction (no {} marker)",
            member.kind, member.id, SNAPSHOT_MARKER
        )));
    }
    if let Some(expected) = &member.checksum {
        let actual = fsutil::dir_checksum(&dir)?;
        if &actual != expected {
            return Err(RewindError::CatalogUnavailable(format!(
                "{} backup {} failed checksum verification after extraction",
                member.kind, member.id
            )));
        }
    }
    if member.kind == BackupKind::Incremental && member.predecessor.is_none() {
        return Err(RewindError::InvalidState(format!(
            "incremental {} lost its lineage during fetch",
            member.id
        )));
    }
    Ok(dir)
}
