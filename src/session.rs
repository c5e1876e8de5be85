//! Explicit per-call context.
//!
//! Tool handlers build one `SessionContext` per request and pass it down, so
//! domain code never reaches for the wall clock or for
//! `stats/current_heartbeat_id.txt` on its own.

use chrono::{DateTime, Local};

use crate::error::{HeartbeatError, IoContext, Result};
use crate::heartbeat_id::HeartbeatId;
use crate::paths::Layout;
use crate::settings::Settings;

#[derive(Debug, Clone)]
pub struct SessionContext {
    pub layout: Layout,
    pub settings: Settings,
    /// Wall clock for this call
    pub now: DateTime<Local>,
    /// Heartbeat the agent is currently running under, if known
    pub current_heartbeat: Option<HeartbeatId>,
}

impl SessionContext {
    pub fn new(layout: Layout, settings: Settings, now: DateTime<Local>) -> Self {
        Self {
            layout,
            settings,
            now,
            current_heartbeat: None,
        }
    }

    pub fn with_heartbeat(mut self, id: HeartbeatId) -> Self {
        self.current_heartbeat = Some(id);
        self
    }

    /// Snapshot the clock and the current heartbeat file. An unreadable or
    /// malformed heartbeat file leaves `current_heartbeat` empty.
    pub fn capture(layout: &Layout, settings: &Settings) -> Self {
        let ctx = Self::new(layout.clone(), settings.clone(), Local::now());
        match read_current_heartbeat(layout) {
            Ok(Some(id)) => ctx.with_heartbeat(id),
            Ok(None) => ctx,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable current heartbeat file");
                ctx
            }
        }
    }

    /// Heartbeat ID for "now", used for theme start/end records.
    pub fn now_id(&self) -> HeartbeatId {
        HeartbeatId::from_datetime(&self.now)
    }

    pub fn require_heartbeat(&self) -> Result<&HeartbeatId> {
        self.current_heartbeat
            .as_ref()
            .ok_or_else(|| HeartbeatError::NoCurrentHeartbeat(self.layout.current_heartbeat_file()))
    }
}

/// Read `stats/current_heartbeat_id.txt`. `Ok(None)` when the file is absent.
pub fn read_current_heartbeat(layout: &Layout) -> Result<Option<HeartbeatId>> {
    let path = layout.current_heartbeat_file();
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path).at("Failed to read", &path)?;
    HeartbeatId::parse(raw.trim()).map(Some)
}
