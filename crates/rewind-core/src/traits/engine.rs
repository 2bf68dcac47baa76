use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// A failing SQL statement, carrying the engine's numeric error code when
/// one could be extracted. The replay applier classifies by code; anything
/// without a code is fatal.
#[derive(Debug, Clone)]
pub struct SqlError {
    pub code: Option<u32>,
    pub message: String,
}

impl SqlError {
    pub fn new(code: Option<u32>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "ERROR {}: {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for SqlError {}

/// The database engine process: started and stopped around the data
/// directory swap, queried during replay and verification.
#[async_trait]
pub trait DatabaseEngine: Send + Sync {
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Block until the engine answers queries, or fail after `timeout`.
    async fn wait_ready(&self, timeout: Duration) -> Result<()>;

    /// Execute a single statement. Statement-level failures come back as
    /// `SqlError` so the caller can classify them; transport-level failures
    /// should be reported as a `SqlError` without a code.
    async fn execute_sql(&self, statement: &str) -> std::result::Result<(), SqlError>;
}
