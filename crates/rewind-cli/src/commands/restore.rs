//! Restore command implementation

use anyhow::{Context, Result};
use rewind::coordinator::RestoreCoordinator;
use rewind::exec::{MysqlBinlogReader, MysqlClientEngine, XtraBackupEngine};
use rewind_core::{parse_target_time, RestoreConfig};
use std::sync::Arc;

pub async fn execute(
    config: RestoreConfig,
    target_time: &str,
    full: Option<String>,
    incrementals: Vec<String>,
) -> Result<()> {
    let target = parse_target_time(target_time, config.timezone)
        .context("Failed to parse the target time")?;
    let pin = super::parse_pin(full, incrementals)?;

    tracing::info!(
        "restoring to {} ({} {})",
        target,
        target_time,
        config.timezone
    );

    let snapshot = Arc::new(XtraBackupEngine::new(config.subprocess_timeout));
    let database = Arc::new(MysqlClientEngine::new(config.subprocess_timeout));
    let reader = Arc::new(MysqlBinlogReader::new(config.subprocess_timeout));

    let coordinator = RestoreCoordinator::new(config, snapshot, database, reader, None);
    let report = match coordinator.restore(target, &pin).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("failing stage: {}", e.stage);
            return Err(e.into());
        }
    };

    println!("\nRestore Report");
    println!("{}", "=".repeat(60));
    println!("Target Time (UTC): {}", report.target_time);
    println!("Full Backup: {}", report.full);
    println!(
        "Incrementals: {}",
        if report.incrementals.is_empty() {
            "none".to_string()
        } else {
            report
                .incrementals
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        }
    );
    println!(
        "Replay Window: {} .. {}",
        report.window.from, report.window.to
    );
    match &report.script_path {
        Some(path) => println!("Replay Script: {}", path.display()),
        None => println!("Replay Script: none (target at the snapshot instant)"),
    }
    println!(
        "Statements: {} applied, {} already present, {} already absent",
        report.outcome.applied, report.outcome.already_exists, report.outcome.record_not_found
    );
    println!(
        "Previous Data Dir: {}",
        report.displaced_data_dir.display()
    );
    println!("Elapsed: {:.1}s", report.elapsed.as_secs_f64());
    Ok(())
}
