//! File-backed state for the AI heartbeat workflow, served to agents over MCP.
//!
//! Everything lives under one working root: `artifacts/` (themes, activity
//! logs, theme histories), `stats/` (current heartbeat, deep work,
//! checkpoints, cooldowns, locks), `themebox/` and `feedbackbox/`.

pub mod activity_log;
pub mod checkpoint;
pub mod context;
pub mod deep_work;
pub mod error;
pub mod heartbeat_id;
pub mod inbox;
pub mod lifecycle;
#[cfg(feature = "mcp")]
pub mod mcp;
pub mod paths;
pub mod sequence;
pub mod session;
pub mod settings;
pub mod theme_status;
pub mod timing;
pub mod tool_usage;
pub mod utils;

pub use error::{HeartbeatError, Result};
pub use heartbeat_id::HeartbeatId;
pub use paths::Layout;
pub use session::SessionContext;
pub use settings::Settings;
