//! Chain resolver: pure selection of the full + incremental lineage for a
//! target instant. No side effects; fetching the selected members is the
//! fetcher's job.

use crate::catalog::BackupCatalog;
use chrono::{DateTime, Utc};
use rewind_core::{BackupId, BackupKind, Result, RestoreChain, RewindError};

/// Operator pinning of chain members. Empty means automatic selection.
#[derive(Debug, Clone, Default)]
pub struct ChainPin {
    pub full: Option<BackupId>,
    pub incrementals: Vec<BackupId>,
}

/// Select the chain for `target_time`.
///
/// Without pins: the full with the greatest `created_at <= target_time`,
/// then every incremental in its lineage inside `(full.created_at,
/// target_time]`, ascending. Pinned members are validated against the same
/// invariants instead of selected.
pub fn resolve_chain(
    catalog: &BackupCatalog,
    target_time: DateTime<Utc>,
    pin: &ChainPin,
) -> Result<RestoreChain> {
    let full = match pin.full {
        Some(id) => {
            let record = catalog.get(id).ok_or_else(|| {
                RewindError::ChainNotFound(format!("pinned full backup {id} is not in the catalog"))
            })?;
            if record.kind != BackupKind::Full {
                return Err(RewindError::ChainNotFound(format!(
                    "pinned backup {id} is not a full backup"
                )));
            }
            if record.created_at > target_time {
                return Err(RewindError::ChainNotFound(format!(
                    "pinned full backup {id} is newer than the target time {target_time}"
                )));
            }
            record.clone()
        }
        None => catalog
            .fulls()
            .filter(|r| r.created_at <= target_time)
            .max_by_key(|r| r.created_at)
            .cloned()
            .ok_or_else(|| {
                RewindError::ChainNotFound(format!(
                    "no full backup exists at or before {target_time}"
                ))
            })?,
    };

    let incrementals = if pin.incrementals.is_empty() {
        catalog
            .incrementals_of(full.id)
            .into_iter()
            .filter(|r| r.created_at > full.created_at && r.created_at <= target_time)
            .cloned()
            .collect()
    } else {
        let mut members = Vec::with_capacity(pin.incrementals.len());
        for id in &pin.incrementals {
            let record = catalog.get(*id).ok_or_else(|| {
                RewindError::ChainNotFound(format!(
                    "pinned incremental backup {id} is not in the catalog"
                ))
            })?;
            if record.created_at > target_time {
                return Err(RewindError::ChainNotFound(format!(
                    "pinned incremental {id} is newer than the target time {target_time}"
                )));
            }
            if record.predecessor != Some(full.id) {
                return Err(RewindError::ChainNotFound(format!(
                    "pinned incremental {id} does not chain from full backup {}",
                    full.id
                )));
            }
            members.push(record.clone());
        }
        members
    };

    let chain = RestoreChain {
        full,
        incrementals,
        target_time,
    };
    chain
        .validate()
        .map_err(|e| RewindError::ChainNotFound(e.to_string()))?;
    tracing::info!(
        "resolved chain: full {} + {} incremental(s), replay from {}",
        chain.full.id,
        chain.incrementals.len(),
        chain.last_member().created_at
    );
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SNAPSHOT_MARKER;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn seed(base: &Path, kind: BackupKind, ts: &str) {
        let dir = base.join(kind.dir_name()).join(ts);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(SNAPSHOT_MARKER), b"").unwrap();
    }

    fn catalog_with(base: &TempDir, members: &[(BackupKind, &str)]) -> BackupCatalog {
        for (kind, ts) in members {
            seed(base.path(), *kind, ts);
        }
        BackupCatalog::open(base.path()).unwrap()
    }

    fn utc(ts: &str) -> DateTime<Utc> {
        ts.parse::<BackupId>().unwrap().instant()
    }

    #[test]
    fn selects_latest_full_before_target() {
        let base = TempDir::new().unwrap();
        let catalog = catalog_with(
            &base,
            &[
                (BackupKind::Full, "20251125_020000"),
                (BackupKind::Full, "20251126_020000"),
                (BackupKind::Full, "20251127_020000"),
            ],
        );
        let chain =
            resolve_chain(&catalog, utc("20251126_120000"), &ChainPin::default()).unwrap();
        assert_eq!(chain.full.id.to_string(), "20251126_020000");
        assert!(chain.incrementals.is_empty());
    }

    #[test]
    fn includes_only_in_window_incrementals() {
        let base = TempDir::new().unwrap();
        let catalog = catalog_with(
            &base,
            &[
                (BackupKind::Full, "20251126_020000"),
                (BackupKind::Incremental, "20251126_030000"),
                (BackupKind::Incremental, "20251126_040000"),
                (BackupKind::Incremental, "20251126_050000"),
            ],
        );
        let chain =
            resolve_chain(&catalog, utc("20251126_043000"), &ChainPin::default()).unwrap();
        assert_eq!(chain.incrementals.len(), 2);
        assert_eq!(chain.last_member().id.to_string(), "20251126_040000");
    }

    #[test]
    fn boundary_incremental_at_exact_target_is_included() {
        let base = TempDir::new().unwrap();
        let catalog = catalog_with(
            &base,
            &[
                (BackupKind::Full, "20251126_020000"),
                (BackupKind::Incremental, "20251126_040000"),
            ],
        );
        let chain =
            resolve_chain(&catalog, utc("20251126_040000"), &ChainPin::default()).unwrap();
        assert_eq!(chain.incrementals.len(), 1);
    }

    #[test]
    fn target_before_any_full_is_chain_not_found() {
        let base = TempDir::new().unwrap();
        let catalog = catalog_with(&base, &[(BackupKind::Full, "20251126_020000")]);
        let err =
            resolve_chain(&catalog, utc("20251125_000000"), &ChainPin::default()).unwrap_err();
        assert!(matches!(err, RewindError::ChainNotFound(_)));
    }

    #[test]
    fn resolution_is_deterministic() {
        let base = TempDir::new().unwrap();
        let catalog = catalog_with(
            &base,
            &[
                (BackupKind::Full, "20251125_020000"),
                (BackupKind::Full, "20251126_020000"),
                (BackupKind::Incremental, "20251126_030000"),
            ],
        );
        let target = utc("20251126_120000");
        let a = resolve_chain(&catalog, target, &ChainPin::default()).unwrap();
        let b = resolve_chain(&catalog, target, &ChainPin::default()).unwrap();
        assert_eq!(a.full.id, b.full.id);
        assert_eq!(
            a.incrementals.iter().map(|r| r.id).collect::<Vec<_>>(),
            b.incrementals.iter().map(|r| r.id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn pinned_full_is_used_verbatim() {
        let base = TempDir::new().unwrap();
        let catalog = catalog_with(
            &base,
            &[
                (BackupKind::Full, "20251125_020000"),
                (BackupKind::Full, "20251126_020000"),
            ],
        );
        let pin = ChainPin {
            full: Some("20251125_020000".parse().unwrap()),
            incrementals: Vec::new(),
        };
        let chain = resolve_chain(&catalog, utc("20251126_120000"), &pin).unwrap();
        assert_eq!(chain.full.id.to_string(), "20251125_020000");
    }

    #[test]
    fn pinned_incremental_after_target_is_caller_error() {
        let base = TempDir::new().unwrap();
        let catalog = catalog_with(
            &base,
            &[
                (BackupKind::Full, "20251126_020000"),
                (BackupKind::Incremental, "20251126_050000"),
            ],
        );
        let pin = ChainPin {
            full: Some("20251126_020000".parse().unwrap()),
            incrementals: vec!["20251126_050000".parse().unwrap()],
        };
        let err = resolve_chain(&catalog, utc("20251126_040000"), &pin).unwrap_err();
        assert!(matches!(err, RewindError::ChainNotFound(_)));
    }

    #[test]
    fn pinned_incremental_from_foreign_lineage_is_rejected() {
        let base = TempDir::new().unwrap();
        let catalog = catalog_with(
            &base,
            &[
                (BackupKind::Full, "20251125_020000"),
                (BackupKind::Full, "20251126_020000"),
                (BackupKind::Incremental, "20251126_030000"),
            ],
        );
        // The incremental chains from the 26th full; pin the 25th.
        let pin = ChainPin {
            full: Some("20251125_020000".parse().unwrap()),
            incrementals: vec!["20251126_030000".parse().unwrap()],
        };
        let err = resolve_chain(&catalog, utc("20251126_120000"), &pin).unwrap_err();
        assert!(matches!(err, RewindError::ChainNotFound(_)));
    }
}
