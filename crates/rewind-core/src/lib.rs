//! Core types, errors, configuration and collaborator traits for rewind,
//! a point-in-time recovery engine for MySQL-compatible databases.
//!
//! This crate carries no orchestration logic; the restore flow itself lives
//! in the `rewind` crate.

pub mod config;
pub mod error;
pub mod time;
pub mod traits;
pub mod types;

pub use config::RestoreConfig;
pub use error::{Result, RewindError};
pub use time::{parse_target_time, parse_zone, TARGET_TIME_FORMAT};
pub use traits::{
    ApplyMode, BinlogReader, DatabaseEngine, ObjectStore, PrepareMode, SnapshotEngine, SqlError,
};
pub use types::{
    BackupId, BackupKind, BackupLocation, BackupRecord, BinlogFile, LogWindow, RestoreChain,
};
