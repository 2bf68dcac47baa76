//! Restore configuration.
//!
//! Defaults match the reference deployment: backups under `/backups`, the
//! engine data directory at `/var/lib/mysql`, operator times interpreted in
//! `Asia/Shanghai`. Everything can be overridden with builder setters or the
//! `REWIND_*` environment variables.

use crate::error::{Result, RewindError};
use crate::time::parse_zone;
use chrono_tz::Tz;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RestoreConfig {
    /// Catalog base: `{base}/full/{ts}`, `{base}/incremental/{ts}` plus the
    /// `.metadata/` pointer directory. Scratch and artifact files land here
    /// too so they survive the data-directory wipe.
    pub backup_base_dir: PathBuf,

    /// The engine's data directory. Exclusively owned by a running restore.
    pub data_dir: PathBuf,

    /// Extra directories searched for binlog segments besides the data
    /// directory and the pre-wipe archival copy.
    pub binlog_dirs: Vec<PathBuf>,

    /// File name of the binlog index inside a log directory.
    pub binlog_index_name: String,

    /// Zone in which operator-supplied target times are interpreted.
    pub timezone: Tz,

    /// Bound on concurrent remote downloads of chain members.
    pub download_workers: usize,

    /// Bound on every collaborator subprocess invocation. A timeout fails
    /// the stage; it is never retried automatically because a half-prepared
    /// working directory is not re-entrant.
    pub subprocess_timeout: Duration,

    /// How long to wait for the engine to answer queries after start.
    pub engine_ready_timeout: Duration,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            backup_base_dir: PathBuf::from("/backups"),
            data_dir: PathBuf::from("/var/lib/mysql"),
            binlog_dirs: Vec::new(),
            binlog_index_name: "mysql-bin.index".to_string(),
            timezone: chrono_tz::Asia::Shanghai,
            download_workers: 4,
            subprocess_timeout: Duration::from_secs(3600),
            engine_ready_timeout: Duration::from_secs(60),
        }
    }
}

impl RestoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `REWIND_BACKUP_DIR`, `REWIND_DATA_DIR` and `REWIND_TZ` overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("REWIND_BACKUP_DIR") {
            config.backup_base_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("REWIND_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(tz) = std::env::var("REWIND_TZ") {
            config.timezone = parse_zone(&tz)?;
        }
        Ok(config)
    }

    pub fn with_backup_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_base_dir = dir.into();
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_binlog_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.binlog_dirs.push(dir.into());
        self
    }

    pub fn with_timezone(mut self, zone: Tz) -> Self {
        self.timezone = zone;
        self
    }

    pub fn with_download_workers(mut self, workers: usize) -> Self {
        self.download_workers = workers.max(1);
        self
    }

    pub fn with_subprocess_timeout(mut self, timeout: Duration) -> Self {
        self.subprocess_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.backup_base_dir.as_os_str().is_empty() {
            return Err(RewindError::Config("backup base dir is empty".into()));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(RewindError::Config("data dir is empty".into()));
        }
        if self.download_workers == 0 {
            return Err(RewindError::Config("download_workers must be >= 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let config = RestoreConfig::default();
        assert_eq!(config.backup_base_dir, PathBuf::from("/backups"));
        assert_eq!(config.timezone, chrono_tz::Asia::Shanghai);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_setters_compose() {
        let config = RestoreConfig::new()
            .with_backup_base_dir("/tmp/backups")
            .with_timezone(chrono_tz::UTC)
            .with_download_workers(0);
        // worker floor is 1
        assert_eq!(config.download_workers, 1);
        assert_eq!(config.timezone, chrono_tz::UTC);
    }
}
