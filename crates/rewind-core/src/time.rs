//! The single local-time-to-UTC conversion boundary.
//!
//! Operators supply target times as naive `YYYY-MM-DD HH:MM:SS` strings in a
//! named zone. Binlog-internal timestamps are UTC. Conversion happens here,
//! exactly once; every comparison downstream is UTC against UTC. Comparing a
//! UTC log timestamp to a naive local string has produced silent 8-hour-off
//! windows before, so no other module may parse an operator time string.

use crate::error::{Result, RewindError};
use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

pub const TARGET_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse an operator-supplied target time in the given named zone and
/// normalize it to UTC.
pub fn parse_target_time(s: &str, zone: Tz) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s.trim(), TARGET_TIME_FORMAT).map_err(|e| {
        RewindError::Parse(format!(
            "invalid target time {s:?} (expected YYYY-MM-DD HH:MM:SS): {e}"
        ))
    })?;
    let local = match zone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        // DST fold: both instants are real; take the earlier one so the
        // restore never overshoots the operator's intent.
        LocalResult::Ambiguous(earlier, later) => {
            tracing::warn!(
                "target time {} is ambiguous in {} ({} vs {}), using the earlier instant",
                naive,
                zone,
                earlier,
                later
            );
            earlier
        }
        LocalResult::None => {
            return Err(RewindError::Parse(format!(
                "target time {naive} does not exist in zone {zone} (DST gap)"
            )));
        }
    };
    Ok(local.with_timezone(&Utc))
}

/// Parse a named timezone, e.g. `Asia/Shanghai` or `UTC`.
pub fn parse_zone(name: &str) -> Result<Tz> {
    name.parse()
        .map_err(|_| RewindError::Config(format!("unknown timezone {name:?}")))
}
