//! Database engine control through the stock client tools.
//!
//! Start goes through the service manager; stop prefers a clean
//! `mysqladmin shutdown` and falls back to the service manager when the
//! server is not answering. Statements run one per client invocation, which
//! matches the line-wise replay artifact.

use super::{run_checked, run_command};
use async_trait::async_trait;
use rewind_core::{DatabaseEngine, Result, RewindError, SqlError};
use std::time::Duration;

pub struct MysqlClientEngine {
    mysql_binary: String,
    mysqladmin_binary: String,
    /// Client connection flags, e.g. socket, user, defaults file.
    client_args: Vec<String>,
    /// Service-manager command that starts the server.
    start_command: Vec<String>,
    /// Service-manager command used when a clean shutdown is not possible.
    stop_command: Vec<String>,
    command_timeout: Duration,
}

impl MysqlClientEngine {
    pub fn new(command_timeout: Duration) -> Self {
        Self {
            mysql_binary: "mysql".to_string(),
            mysqladmin_binary: "mysqladmin".to_string(),
            client_args: Vec::new(),
            start_command: vec!["systemctl".into(), "start".into(), "mysqld".into()],
            stop_command: vec!["systemctl".into(), "stop".into(), "mysqld".into()],
            command_timeout,
        }
    }

    pub fn with_client_args(mut self, args: Vec<String>) -> Self {
        self.client_args = args;
        self
    }

    pub fn with_service_commands(mut self, start: Vec<String>, stop: Vec<String>) -> Self {
        self.start_command = start;
        self.stop_command = stop;
        self
    }

    async fn ping(&self) -> bool {
        let mut args = self.client_args.clone();
        args.push("ping".to_string());
        matches!(
            run_command(&self.mysqladmin_binary, &args, self.command_timeout).await,
            Ok(out) if out.success()
        )
    }
}

/// `ERROR 1050 (42S01) at line 1: ...` on the client's stderr.
fn parse_error_code(stderr: &str) -> Option<u32> {
    for line in stderr.lines() {
        if let Some(rest) = line.trim().strip_prefix("ERROR ") {
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            if let Ok(code) = digits.parse() {
                return Some(code);
            }
        }
    }
    None
}

#[async_trait]
impl DatabaseEngine for MysqlClientEngine {
    async fn start(&self) -> Result<()> {
        let (program, args) = self
            .start_command
            .split_first()
            .ok_or_else(|| RewindError::Config("engine start command is empty".into()))?;
        run_checked(program, args, self.command_timeout).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut args = self.client_args.clone();
        args.push("shutdown".to_string());
        let shutdown = run_command(&self.mysqladmin_binary, &args, self.command_timeout).await;
        if matches!(&shutdown, Ok(out) if out.success()) {
            return Ok(());
        }
        tracing::warn!("clean shutdown failed, stopping through the service manager");
        let (program, fallback_args) = self
            .stop_command
            .split_first()
            .ok_or_else(|| RewindError::Config("engine stop command is empty".into()))?;
        run_checked(program, fallback_args, self.command_timeout).await?;
        Ok(())
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.ping().await {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(RewindError::Timeout(
                    timeout,
                    "waiting for the database engine to answer".to_string(),
                ));
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    async fn execute_sql(&self, statement: &str) -> std::result::Result<(), SqlError> {
        let mut args = self.client_args.clone();
        args.push("-e".to_string());
        args.push(statement.to_string());
        match run_command(&self.mysql_binary, &args, self.command_timeout).await {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(SqlError::new(
                parse_error_code(&out.stderr),
                out.stderr.trim().to_string(),
            )),
            Err(e) => Err(SqlError::new(None, e.to_string())),
        }
    }
}
