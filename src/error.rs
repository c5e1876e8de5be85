//! Error type shared by every heartbeat operation.
//!
//! Validation variants abort before anything is written. State-conflict
//! variants come from the filesystem; lifecycle operations roll back their
//! partial writes before returning one of them.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeartbeatError {
    // ── Validation ──────────────────────────────────────────────────────
    #[error("Invalid heartbeat ID '{0}': expected 14 digits in YYYYMMDDHHMMSS format")]
    InvalidHeartbeatId(String),

    #[error("Heartbeat ID '{id}' does not encode a valid local date/time")]
    InvalidCalendarDate { id: String },

    #[error(
        "Future heartbeat IDs are not allowed.\n\
         The given ID ({id}) is {ahead} ahead of the current time.\n\
         Use the current time or an earlier one."
    )]
    FutureHeartbeatId { id: String, ahead: String },

    #[error("'{given}' was given, so '{missing}' is required as well")]
    MissingCompanion { given: &'static str, missing: &'static str },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ── State conflicts ─────────────────────────────────────────────────
    #[error("Theme directory does not exist: {}", .0.display())]
    ThemeDirectoryMissing(PathBuf),

    #[error("Parent theme directory does not exist: {}", .0.display())]
    ParentThemeMissing(PathBuf),

    #[error("Theme history file already exists: {}. A conflicting write may have happened.", .0.display())]
    HistoryExists(PathBuf),

    #[error("Sequence limit (99) reached for activity logs of heartbeat ID {0}")]
    SequenceExhausted(String),

    #[error("Artifact file not found: {}", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("Inbox item not found: {}", .0.display())]
    InboxItemMissing(PathBuf),

    #[error("Inbox item has already been processed: {0}")]
    InboxItemProcessed(String),

    #[error("No current heartbeat ID available (expected {})", .0.display())]
    NoCurrentHeartbeat(PathBuf),

    #[error("Malformed activity log {}: {reason}", path.display())]
    MalformedLog { path: PathBuf, reason: String },

    // ── I/O ─────────────────────────────────────────────────────────────
    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, HeartbeatError>;

impl HeartbeatError {
    /// Wrap an I/O failure with the operation and the path it touched.
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { op, path: path.into(), source }
    }

    /// True for failures raised before any write was attempted.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidHeartbeatId(_)
                | Self::InvalidCalendarDate { .. }
                | Self::FutureHeartbeatId { .. }
                | Self::MissingCompanion { .. }
                | Self::InvalidInput(_)
        )
    }
}

/// Extension for attaching path context to `std::io::Result`.
pub(crate) trait IoContext<T> {
    fn at(self, op: &'static str, path: &std::path::Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, op: &'static str, path: &std::path::Path) -> Result<T> {
        self.map_err(|e| HeartbeatError::io(op, path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        assert!(HeartbeatError::InvalidHeartbeatId("x".into()).is_validation());
        assert!(HeartbeatError::MissingCompanion {
            given: "parentThemeStartId",
            missing: "parentThemeDirectoryPart"
        }
        .is_validation());
        assert!(!HeartbeatError::SequenceExhausted("20250101000000".into()).is_validation());
    }

    #[test]
    fn test_io_message_carries_path() {
        let err = HeartbeatError::io(
            "Failed to read",
            "stats/current_heartbeat_id.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        let msg = err.to_string();
        assert!(msg.contains("Failed to read"));
        assert!(msg.contains("stats/current_heartbeat_id.txt"));
    }
}
