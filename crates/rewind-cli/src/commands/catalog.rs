//! Catalog listing command implementation

use anyhow::{Context, Result};
use rewind::catalog::BackupCatalog;
use rewind_core::{BackupKind, RestoreConfig};

pub async fn execute(config: RestoreConfig) -> Result<()> {
    let catalog = BackupCatalog::open(&config.backup_base_dir)
        .context("Failed to open the backup catalog")?;

    println!("\nBackup Catalog: {}", config.backup_base_dir.display());
    println!("{}", "=".repeat(60));
    let mut count = 0;
    for record in catalog.records() {
        let lineage = match (record.kind, record.predecessor) {
            (BackupKind::Incremental, Some(pred)) => format!("  <- {pred}"),
            _ => String::new(),
        };
        println!(
            "{}  {:<11} {:>12} bytes{}",
            record.id, record.kind, record.size_bytes, lineage
        );
        count += 1;
    }
    if count == 0 {
        println!("(empty)");
    }

    if let Some(latest) = catalog.latest(BackupKind::Full)? {
        println!("\nLatest Full: {latest}");
    }
    if let Some(latest) = catalog.latest(BackupKind::Incremental)? {
        println!("Latest Incremental: {latest}");
    }
    Ok(())
}
