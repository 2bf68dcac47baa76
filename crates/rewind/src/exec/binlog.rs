//! `mysqlbinlog`-backed log reader.
//!
//! The tool interprets `--start-datetime`/`--stop-datetime` in the system
//! timezone of the process, so every invocation pins `TZ=UTC` and the
//! filters are rendered in UTC. The filters are a coarse prefilter only;
//! the exact recovery boundary is enforced later from the epoch timestamps
//! inside the decoded text, which carry no zone at all.

use super::run_checked_env;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rewind_core::{BinlogReader, Result, RewindError};
use std::path::{Path, PathBuf};
use std::time::Duration;

const FILTER_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const CHILD_ENV: &[(&str, &str)] = &[("TZ", "UTC")];

pub struct MysqlBinlogReader {
    binary: String,
    timeout: Duration,
}

impl MysqlBinlogReader {
    pub fn new(timeout: Duration) -> Self {
        Self {
            binary: "mysqlbinlog".to_string(),
            timeout,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn decode_args(&self) -> Vec<String> {
        vec![
            "--no-defaults".to_string(),
            "-v".to_string(),
            "--base64-output=DECODE-ROWS".to_string(),
            "--print-table-metadata".to_string(),
            "--skip-gtids".to_string(),
        ]
    }

    fn render_filter(&self, at: DateTime<Utc>) -> String {
        at.format(FILTER_FORMAT).to_string()
    }
}

#[async_trait]
impl BinlogReader for MysqlBinlogReader {
    /// First and last event timestamp in `file`, from a full decode pass.
    async fn time_span(&self, file: &Path) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let mut args = self.decode_args();
        args.push(file.display().to_string());
        let output = run_checked_env(&self.binary, &args, CHILD_ENV, self.timeout).await?;

        let mut first = None;
        let mut last = None;
        for line in output.stdout.lines() {
            let Some(rest) = line.trim().strip_prefix("SET TIMESTAMP=") else {
                continue;
            };
            let digits = rest
                .split(|c: char| !c.is_ascii_digit())
                .next()
                .unwrap_or("");
            let Ok(epoch) = digits.parse::<i64>() else {
                continue;
            };
            let Some(at) = DateTime::from_timestamp(epoch, 0) else {
                continue;
            };
            first.get_or_insert(at);
            last = Some(at);
        }
        match (first, last) {
            (Some(first), Some(last)) => Ok((first, last)),
            _ => Err(RewindError::Parse(format!(
                "{} contains no timestamped events",
                file.display()
            ))),
        }
    }

    async fn read_events(
        &self,
        files: &[PathBuf],
        start: Option<DateTime<Utc>>,
        stop: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let mut args = self.decode_args();
        if let Some(start) = start {
            args.push(format!("--start-datetime={}", self.render_filter(start)));
        }
        args.push(format!("--stop-datetime={}", self.render_filter(stop)));
        for file in files {
            args.push(file.display().to_string());
        }
        let output = run_checked_env(&self.binary, &args, CHILD_ENV, self.timeout).await?;
        Ok(output.stdout.lines().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_render_in_utc_to_match_the_pinned_child_zone() {
        let reader = MysqlBinlogReader::new(Duration::from_secs(10));
        let at = DateTime::from_timestamp(1764122400, 0).unwrap(); // 2025-11-26 02:00:00 UTC
        assert_eq!(reader.render_filter(at), "2025-11-26 02:00:00");
        assert!(CHILD_ENV.contains(&("TZ", "UTC")));
    }
}
