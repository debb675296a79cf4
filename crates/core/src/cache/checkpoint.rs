use anyhow::Context;
use chrono::{DateTime, Utc};
use std::path::Path;

// Checkpoints are day-granular in a fixed reference zone (UTC) so every
// process agrees on when "today" rolls over regardless of host locale.
const CHECKPOINT_OFFSET_SECS: i32 = 0;
const STAMP_FORMAT: &str = "%d/%m/%Y UTC";

pub fn date_stamp(now_utc: DateTime<Utc>) -> anyhow::Result<String> {
    let zone = chrono::FixedOffset::east_opt(CHECKPOINT_OFFSET_SECS)
        .context("invalid checkpoint offset")?;
    Ok(now_utc.with_timezone(&zone).format(STAMP_FORMAT).to_string())
}

/// Stamp stored at `path`, or `None` when the file is absent or unreadable.
pub async fn read_checkpoint(path: &Path) -> Option<String> {
    tokio::fs::read_to_string(path)
        .await
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
