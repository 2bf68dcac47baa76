use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RewindError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    /// A backup member could not be fetched from local or remote storage.
    /// Retryable by the caller, never retried internally.
    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// No eligible full backup (or pinned chain) reaches the target time.
    #[error("No restore chain found: {0}")]
    ChainNotFound(String),

    /// A prepare/merge/copy-back operation of the snapshot engine failed.
    /// The working directory must be discarded before retrying.
    #[error("Snapshot assembly failed: {0}")]
    AssemblyFailed(String),

    /// Binlog retention expired before the end of the assembled chain; the
    /// chain itself is unusable for point-in-time recovery.
    #[error("Binlog window unavailable: {0}")]
    WindowUnavailable(String),

    /// An unclassified statement failure during replay. Aborts immediately,
    /// leaving the script artifact in place for inspection.
    #[error("Fatal replay error: {0}")]
    ReplayFatal(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Timed out after {0:?}: {1}")]
    Timeout(Duration, String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RewindError>;
