pub mod catalog;
pub mod resolve;
pub mod restore;

use anyhow::Result;
use rewind::resolver::ChainPin;

/// Parse the `--full` / `--incremental` pins into a [`ChainPin`].
pub fn parse_pin(full: Option<String>, incrementals: Vec<String>) -> Result<ChainPin> {
    let full = full.map(|s| s.parse()).transpose()?;
    let incrementals = incrementals
        .into_iter()
        .map(|s| s.parse().map_err(anyhow::Error::from))
        .collect::<Result<Vec<_>>>()?;
    Ok(ChainPin { full, incrementals })
}
