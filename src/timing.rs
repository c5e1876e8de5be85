//! Elapsed-time heuristics.
//!
//! Two independent checks:
//! - deviation between a heartbeat ID and the wall clock, scaled against the
//!   configurable `TIMESTAMP_ANOMALY_THRESHOLD`
//! - time spent inside one heartbeat, with fixed 5/10 minute levels that a
//!   deep-work declaration suppresses

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::error::{HeartbeatError, Result};
use crate::heartbeat_id::HeartbeatId;

/// Informational notice after five minutes in one heartbeat.
pub const DURATION_INFO_SECS: i64 = 300;
/// Recommend splitting the activity after ten minutes.
pub const DURATION_SPLIT_SECS: i64 = 600;

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", n, unit)
    }
}

/// Human-readable magnitude of an elapsed time. The sign is ignored.
///
/// `45` → "45 seconds", `125` → "~2 minutes", `3900` → "~1 hour 5 minutes".
pub fn format_elapsed(seconds: i64) -> String {
    let secs = seconds.unsigned_abs();
    if secs < 60 {
        return plural(secs, "second");
    }
    let minutes = secs / 60;
    if minutes < 60 {
        return format!("~{}", plural(minutes, "minute"));
    }
    let (hours, rem) = (minutes / 60, minutes % 60);
    if rem == 0 {
        format!("~{}", plural(hours, "hour"))
    } else {
        format!("~{} {}", plural(hours, "hour"), plural(rem, "minute"))
    }
}

/// Exact minutes and seconds, used when reporting how far in the future an id is.
pub fn format_offset(seconds: i64) -> String {
    let secs = seconds.unsigned_abs();
    let (minutes, rem) = (secs / 60, secs % 60);
    match (minutes, rem) {
        (0, s) => plural(s, "second"),
        (m, 0) => plural(m, "minute"),
        (m, s) => format!("{} {}", plural(m, "minute"), plural(s, "second")),
    }
}

/// Seconds since `id`, or `FutureHeartbeatId` if it lies ahead of `now`.
pub fn ensure_not_future(id: &HeartbeatId, now: &DateTime<Local>) -> Result<i64> {
    let elapsed = id.elapsed_since(now)?;
    if elapsed < 0 {
        return Err(HeartbeatError::FutureHeartbeatId {
            id: id.to_string(),
            ahead: format_offset(elapsed),
        });
    }
    Ok(elapsed)
}

// ─── Deviation ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviationLevel {
    None,
    Info,
    Warning,
    Critical,
}

/// Classify `|elapsed|` against the threshold: ≥90% critical, ≥75% warning,
/// ≥50% info.
pub fn classify_deviation(elapsed_seconds: i64, threshold_secs: u64) -> DeviationLevel {
    // u128 keeps percent scaling exact for any configured threshold
    let magnitude = u128::from(elapsed_seconds.unsigned_abs()) * 100;
    let threshold = u128::from(threshold_secs.max(1));
    if magnitude >= threshold * 90 {
        DeviationLevel::Critical
    } else if magnitude >= threshold * 75 {
        DeviationLevel::Warning
    } else if magnitude >= threshold * 50 {
        DeviationLevel::Info
    } else {
        DeviationLevel::None
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeDeviation {
    pub heartbeat_id: String,
    pub elapsed_seconds: i64,
    pub threshold_secs: u64,
    pub level: DeviationLevel,
}

impl TimeDeviation {
    pub fn message(&self) -> Option<String> {
        let direction = if self.elapsed_seconds < 0 { "ahead of" } else { "behind" };
        let delta = format_elapsed(self.elapsed_seconds);
        let threshold = format_elapsed(i64::try_from(self.threshold_secs).unwrap_or(i64::MAX));
        let text = match self.level {
            DeviationLevel::None => return None,
            DeviationLevel::Info => format!(
                "ℹ️ Time deviation notice: heartbeat ID {} is {} {} the current time.",
                self.heartbeat_id, delta, direction
            ),
            DeviationLevel::Warning => format!(
                "⚠️ Time deviation warning: heartbeat ID {} is {} {} the current time (anomaly threshold: {}).",
                self.heartbeat_id, delta, direction, threshold
            ),
            DeviationLevel::Critical => format!(
                "🚨 Time deviation critical: heartbeat ID {} is {} {} the current time and close to the anomaly threshold ({}). Check that you are using the current heartbeat ID.",
                self.heartbeat_id, delta, direction, threshold
            ),
        };
        Some(text)
    }
}

pub fn check_time_deviation(id: &HeartbeatId, now: &DateTime<Local>, threshold_secs: u64) -> Result<TimeDeviation> {
    let elapsed = id.elapsed_since(now)?;
    Ok(TimeDeviation {
        heartbeat_id: id.to_string(),
        elapsed_seconds: elapsed,
        threshold_secs,
        level: classify_deviation(elapsed, threshold_secs),
    })
}

// ─── Heartbeat duration ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationAdvisory {
    None,
    Info,
    SplitRecommended,
    /// A deep-work declaration is active for this heartbeat
    Suppressed,
}

pub fn classify_duration(elapsed_seconds: i64, deep_work_active: bool) -> DurationAdvisory {
    if deep_work_active {
        DurationAdvisory::Suppressed
    } else if elapsed_seconds >= DURATION_SPLIT_SECS {
        DurationAdvisory::SplitRecommended
    } else if elapsed_seconds >= DURATION_INFO_SECS {
        DurationAdvisory::Info
    } else {
        DurationAdvisory::None
    }
}

impl DurationAdvisory {
    pub fn message(&self, elapsed_seconds: i64) -> Option<String> {
        let minutes = elapsed_seconds.max(0) / 60;
        match self {
            Self::None => None,
            Self::Info => Some(format!(
                "Elapsed time notice: {} minutes have passed since this heartbeat started.",
                minutes
            )),
            Self::SplitRecommended => Some(format!(
                "Activity split recommended: {} minutes have passed since this heartbeat started. \
                 Following the small-steps principle, wrap up this activity and continue in the next cycle.",
                minutes
            )),
            Self::Suppressed => Some("Deep work declared: elapsed-time warnings are suppressed for this heartbeat.".to_string()),
        }
    }
}
