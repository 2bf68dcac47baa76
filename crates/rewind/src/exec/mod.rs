//! Subprocess-backed implementations of the collaborator traits, plus the
//! shared command runner they are built on.

pub mod binlog;
pub mod engine;
pub mod snapshot;

pub use binlog::MysqlBinlogReader;
pub use engine::MysqlClientEngine;
pub use snapshot::XtraBackupEngine;

use rewind_core::{Result, RewindError};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Captured result of a finished child process.
#[derive(Debug)]
pub struct CommandOutput {
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }
}

/// Run `program` with `args`, bounded by `timeout`. A timed-out child is
/// killed before the error is returned.
pub async fn run_command(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<CommandOutput> {
    run_command_env(program, args, &[], timeout).await
}

/// As `run_command`, with `envs` set on the child. Tools that interpret
/// their arguments relative to the system timezone get pinned through this.
pub async fn run_command_env(
    program: &str,
    args: &[String],
    envs: &[(&str, &str)],
    timeout: Duration,
) -> Result<CommandOutput> {
    tracing::debug!("running {} {}", program, args.join(" "));
    let mut command = Command::new(program);
    for (key, value) in envs {
        command.env(key, value);
    }
    let mut child = command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| RewindError::Engine(format!("failed to spawn {program}: {e}")))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(RewindError::Timeout(
                timeout,
                format!("{program} {}", args.join(" ")),
            ));
        }
    };

    Ok(CommandOutput {
        status_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// As `run_command`, but a nonzero exit is an engine error carrying the
/// child's stderr.
pub async fn run_checked(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<CommandOutput> {
    run_checked_env(program, args, &[], timeout).await
}

/// As `run_checked`, with `envs` set on the child.
pub async fn run_checked_env(
    program: &str,
    args: &[String],
    envs: &[(&str, &str)],
    timeout: Duration,
) -> Result<CommandOutput> {
    let output = run_command_env(program, args, envs, timeout).await?;
    if !output.success() {
        return Err(RewindError::Engine(format!(
            "{program} exited with status {:?}: {}",
            output.status_code,
            output.stderr.trim()
        )));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn captures_stdout() {
        let out = run_checked("echo", &args(&["hello"]), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_engine_error() {
        let err = run_checked("false", &args(&[]), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RewindError::Engine(_)));
    }

    #[tokio::test]
    async fn env_vars_reach_the_child() {
        let out = run_checked_env("env", &args(&[]), &[("TZ", "UTC")], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.stdout.lines().any(|l| l == "TZ=UTC"));
    }

    #[tokio::test]
    async fn slow_child_times_out() {
        let err = run_command("sleep", &args(&["5"]), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, RewindError::Timeout(_, _)));
    }
}
