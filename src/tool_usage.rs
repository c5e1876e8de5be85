//! Cooldown and lock markers for rate-limited external tools.
//!
//! `stats/cooldown/{toolId}` is touched after a successful use.
//! `stats/lock/{toolId}` marks an exhausted quota until the next success.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{HeartbeatError, IoContext, Result};
use crate::paths::Layout;

fn tool_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("static regex"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ToolUsageStatus {
    Success,
    QuotaExceeded,
}

impl ToolUsageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::QuotaExceeded => "quota_exceeded",
        }
    }
}

pub fn validate_tool_id(tool_id: &str) -> Result<()> {
    // "." and ".." pass the character class but would escape the directory
    if !tool_id_pattern().is_match(tool_id) || tool_id.chars().all(|c| c == '.') {
        return Err(HeartbeatError::InvalidInput(format!(
            "toolId may only contain letters, digits, '_', '.' and '-': {}",
            tool_id
        )));
    }
    Ok(())
}

/// Create `path` if needed and set its modification time to now.
fn touch(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).at("Failed to create", dir)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .at("Failed to open", path)?;
    file.set_modified(SystemTime::now()).at("Failed to touch", path)
}

/// Record one use of `tool_id`. Returns the marker file that was touched.
pub fn report_tool_usage(layout: &Layout, tool_id: &str, status: ToolUsageStatus) -> Result<PathBuf> {
    validate_tool_id(tool_id)?;
    let (marker, other) = match status {
        ToolUsageStatus::Success => (layout.cooldown().join(tool_id), Some(layout.lock().join(tool_id))),
        ToolUsageStatus::QuotaExceeded => (layout.lock().join(tool_id), None),
    };
    touch(&marker)?;
    if let Some(lock) = other.filter(|p| p.exists()) {
        std::fs::remove_file(&lock).at("Failed to remove", &lock)?;
        tracing::info!(tool_id, "Tool lock cleared");
    }
    tracing::info!(tool_id, status = status.as_str(), "Tool usage recorded");
    Ok(marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_id_validation() {
        assert!(validate_tool_id("gemini.google.search").is_ok());
        assert!(validate_tool_id("tool-1_x").is_ok());
        for bad in ["", "a/b", "..", "has space"] {
            assert!(validate_tool_id(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_quota_then_success() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());

        let lock = report_tool_usage(&layout, "web.search", ToolUsageStatus::QuotaExceeded).unwrap();
        assert!(lock.exists());
        assert!(!layout.cooldown().join("web.search").exists());

        let cooldown = report_tool_usage(&layout, "web.search", ToolUsageStatus::Success).unwrap();
        assert!(cooldown.exists());
        assert!(!lock.exists());
    }

    #[test]
    fn test_success_is_repeatable() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        report_tool_usage(&layout, "t", ToolUsageStatus::Success).unwrap();
        report_tool_usage(&layout, "t", ToolUsageStatus::Success).unwrap();
        assert!(layout.cooldown().join("t").is_file());
    }
}
