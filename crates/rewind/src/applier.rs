//! Replay applier: feeds the generated script to the running engine one
//! statement at a time and classifies failures.
//!
//! Replay starts from a snapshot that may already contain some of the
//! window's changes (the snapshot is taken while the server runs, so its
//! copy point sits somewhere inside the last log file). Duplicate-object and
//! duplicate-row errors are therefore expected and non-fatal, as are
//! missing-row errors from re-applied deletes. Everything else aborts the
//! replay and leaves the artifact in place for inspection.

use crate::binlog::ScriptArtifact;
use rewind_core::{DatabaseEngine, Result, RewindError, SqlError};
use std::fs;

/// Duplicate table, database, column, key or row.
const ALREADY_EXISTS_CODES: [u32; 5] = [1050, 1007, 1060, 1061, 1062];
/// Row or table already gone.
const RECORD_NOT_FOUND_CODES: [u32; 2] = [1032, 1146];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReplayOutcome {
    pub applied: usize,
    pub already_exists: usize,
    pub record_not_found: usize,
}

impl ReplayOutcome {
    pub fn total(&self) -> usize {
        self.applied + self.already_exists + self.record_not_found
    }
}

pub struct ReplayApplier;

impl ReplayApplier {
    pub async fn apply(
        engine: &dyn DatabaseEngine,
        artifact: &ScriptArtifact,
    ) -> Result<ReplayOutcome> {
        let contents = fs::read_to_string(&artifact.path)?;
        let mut outcome = ReplayOutcome::default();

        for (line_no, line) in contents.lines().enumerate() {
            let statement = line.trim();
            if statement.is_empty() || statement.starts_with("--") {
                continue;
            }
            match engine.execute_sql(statement).await {
                Ok(()) => outcome.applied += 1,
                Err(e) => match classify(&e) {
                    Classification::AlreadyExists => {
                        outcome.already_exists += 1;
                        tracing::warn!(
                            "line {}: target already has this change ({}), continuing",
                            line_no + 1,
                            e
                        );
                    }
                    Classification::RecordNotFound => {
                        outcome.record_not_found += 1;
                        tracing::warn!(
                            "line {}: record already absent ({}), continuing",
                            line_no + 1,
                            e
                        );
                    }
                    Classification::Fatal => {
                        return Err(RewindError::ReplayFatal(format!(
                            "statement at line {} of {} failed: {}",
                            line_no + 1,
                            artifact.path.display(),
                            e
                        )));
                    }
                },
            }
        }

        if outcome.applied == 0 && outcome.total() > 0 {
            tracing::warn!(
                "replay applied nothing: all {} statement(s) were already present or absent; \
                 the target time may predate the snapshot's copy point",
                outcome.total()
            );
        }
        tracing::info!(
            "replay done: {} applied, {} already present, {} already absent",
            outcome.applied,
            outcome.already_exists,
            outcome.record_not_found
        );
        Ok(outcome)
    }
}

enum Classification {
    AlreadyExists,
    RecordNotFound,
    Fatal,
}

fn classify(error: &SqlError) -> Classification {
    match error.code {
        Some(code) if ALREADY_EXISTS_CODES.contains(&code) => Classification::AlreadyExists,
        Some(code) if RECORD_NOT_FOUND_CODES.contains(&code) => Classification::RecordNotFound,
        _ => Classification::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use rewind_core::LogWindow;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Engine double: fails statements by configured error code.
    #[derive(Default)]
    struct ScriptedEngine {
        failures: HashMap<String, Option<u32>>,
        executed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DatabaseEngine for ScriptedEngine {
        async fn start(&self) -> Result<()> {
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }

        async fn wait_ready(&self, _timeout: Duration) -> Result<()> {
            Ok(())
        }

        async fn execute_sql(&self, statement: &str) -> std::result::Result<(), SqlError> {
            self.executed.lock().unwrap().push(statement.to_string());
            match self.failures.get(statement) {
                Some(code) => Err(SqlError::new(*code, "scripted failure")),
                None => Ok(()),
            }
        }
    }

    fn artifact_with(dir: &TempDir, statements: &[&str]) -> ScriptArtifact {
        let path = dir.path().join("pitr_replay_test.sql");
        let mut body = String::from("-- header\n\n");
        for s in statements {
            body.push_str(s);
            body.push('\n');
        }
        fs::write(&path, body).unwrap();
        let at = DateTime::from_timestamp(0, 0).unwrap();
        ScriptArtifact {
            path,
            statement_count: statements.len(),
            window: LogWindow {
                from: at,
                to: at,
                source_files: Vec::new(),
            },
        }
    }

    #[tokio::test]
    async fn applies_statements_and_skips_comments() {
        let dir = TempDir::new().unwrap();
        let artifact = artifact_with(&dir, &["INSERT INTO t VALUES (1);", "INSERT INTO t VALUES (2);"]);
        let engine = ScriptedEngine::default();
        let outcome = ReplayApplier::apply(&engine, &artifact).await.unwrap();
        assert_eq!(outcome.applied, 2);
        assert_eq!(engine.executed.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_errors_are_counted_not_fatal() {
        let dir = TempDir::new().unwrap();
        let artifact = artifact_with(
            &dir,
            &[
                "CREATE TABLE t (id INT);",
                "INSERT INTO t VALUES (1);",
                "DELETE FROM t WHERE id=9 LIMIT 1;",
            ],
        );
        let mut engine = ScriptedEngine::default();
        engine
            .failures
            .insert("CREATE TABLE t (id INT);".to_string(), Some(1050));
        engine
            .failures
            .insert("DELETE FROM t WHERE id=9 LIMIT 1;".to_string(), Some(1032));
        let outcome = ReplayApplier::apply(&engine, &artifact).await.unwrap();
        assert_eq!(
            outcome,
            ReplayOutcome {
                applied: 1,
                already_exists: 1,
                record_not_found: 1
            }
        );
    }

    #[tokio::test]
    async fn unknown_code_aborts_and_stops() {
        let dir = TempDir::new().unwrap();
        let artifact = artifact_with(
            &dir,
            &["INSERT INTO t VALUES (1);", "BAD SQL;", "INSERT INTO t VALUES (2);"],
        );
        let mut engine = ScriptedEngine::default();
        engine.failures.insert("BAD SQL;".to_string(), Some(1064));
        let err = ReplayApplier::apply(&engine, &artifact).await.unwrap_err();
        assert!(matches!(err, RewindError::ReplayFatal(_)));
        // Nothing past the failing line ran.
        assert_eq!(engine.executed.lock().unwrap().len(), 2);
        // The artifact survives for inspection.
        assert!(artifact.path.exists());
    }

    #[tokio::test]
    async fn codeless_error_is_fatal() {
        let dir = TempDir::new().unwrap();
        let artifact = artifact_with(&dir, &["INSERT INTO t VALUES (1);"]);
        let mut engine = ScriptedEngine::default();
        engine
            .failures
            .insert("INSERT INTO t VALUES (1);".to_string(), None);
        let err = ReplayApplier::apply(&engine, &artifact).await.unwrap_err();
        assert!(matches!(err, RewindError::ReplayFatal(_)));
    }
}
