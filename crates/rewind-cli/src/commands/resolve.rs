//! Resolve command implementation

use anyhow::{Context, Result};
use rewind::catalog::BackupCatalog;
use rewind::resolver::{resolve_chain, ChainPin};
use rewind_core::{parse_target_time, RestoreConfig};

pub async fn execute(config: RestoreConfig, target_time: &str) -> Result<()> {
    let target = parse_target_time(target_time, config.timezone)
        .context("Failed to parse the target time")?;

    let catalog = BackupCatalog::open(&config.backup_base_dir)
        .context("Failed to open the backup catalog")?;
    let chain = resolve_chain(&catalog, target, &ChainPin::default())?;

    println!("\nResolved Chain");
    println!("{}", "=".repeat(60));
    println!("Target Time (UTC): {}", target);
    println!("Full Backup: {} ({})", chain.full.id, chain.full.created_at);
    for inc in &chain.incrementals {
        println!("Incremental: {} ({})", inc.id, inc.created_at);
    }
    println!("Replay From: {}", chain.last_member().created_at);
    Ok(())
}
