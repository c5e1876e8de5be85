//! Liveness notes that fall short of an activity log.

use std::path::PathBuf;

use crate::activity_log::latest_activity_log_anywhere;
use crate::deep_work;
use crate::error::{HeartbeatError, IoContext, Result};
use crate::heartbeat_id::HeartbeatId;
use crate::session::SessionContext;

/// Minutes since the last log after which deep work is suggested.
pub const DEEP_WORK_HINT_MINUTES: i64 = 5;

#[derive(Debug, Clone)]
pub struct CheckpointWritten {
    pub path: PathBuf,
    /// Whole minutes between the last activity log and this heartbeat
    pub minutes_since_last_log: Option<i64>,
    pub suggest_deep_work: bool,
}

impl CheckpointWritten {
    pub fn message(&self, ctx: &SessionContext) -> String {
        let mut text = format!("Checkpoint created: {}", ctx.layout.display_path(&self.path));
        if let Some(minutes) = self.minutes_since_last_log {
            text.push_str(&format!("\nAbout {} minutes have passed since the last activity log.", minutes));
        }
        if self.suggest_deep_work {
            text.push_str("\nIf a long stretch of focused work is expected, consider the start_deep_work tool.");
        }
        text
    }
}

/// Write `stats/checkpoints/{id}.txt` for the current heartbeat.
pub fn checkpoint(ctx: &SessionContext, current_activity: &str) -> Result<CheckpointWritten> {
    if current_activity.trim().is_empty() {
        return Err(HeartbeatError::InvalidInput("current_activity must not be empty".to_string()));
    }
    let id = ctx.require_heartbeat()?;

    let dir = ctx.layout.checkpoints();
    std::fs::create_dir_all(&dir).at("Failed to create", &dir)?;
    let path = dir.join(format!("{}.txt", id));
    std::fs::write(&path, current_activity).at("Failed to write", &path)?;
    tracing::debug!(heartbeat_id = %id, "Checkpoint written");

    let minutes_since_last_log = minutes_since_latest_log(ctx, id)?;
    let suggest_deep_work = match minutes_since_last_log {
        Some(m) if m >= DEEP_WORK_HINT_MINUTES => !deep_work::any_active(&ctx.layout)?,
        _ => false,
    };

    Ok(CheckpointWritten { path, minutes_since_last_log, suggest_deep_work })
}

/// Logs stamped after `current` are ignored.
fn minutes_since_latest_log(ctx: &SessionContext, current: &HeartbeatId) -> Result<Option<i64>> {
    let Some(latest) = latest_activity_log_anywhere(&ctx.layout)? else { return Ok(None) };
    let latest_id = match HeartbeatId::parse(&latest.heartbeat_id) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(file = %latest.filename(), error = %e, "Latest activity log has an unusable id");
            return Ok(None);
        }
    };
    let seconds = (current.to_naive() - latest_id.to_naive()).num_seconds();
    Ok((seconds >= 0).then_some(seconds / 60))
}
