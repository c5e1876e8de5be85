//! Deep-work declarations.
//!
//! A declaration is `stats/deep_work/{id}.txt`. While it exists the
//! elapsed-time advisories for that heartbeat are suppressed. The next activity
//! log renames it to `{id}.completed.txt`; a newer declaration renames older
//! ones to `{id}.expired.txt`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Local};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{HeartbeatError, IoContext, Result};
use crate::heartbeat_id::HeartbeatId;
use crate::paths::Layout;

pub const MIN_DESCRIPTION_CHARS: usize = 10;
pub const MAX_DESCRIPTION_CHARS: usize = 200;
pub const MAX_PLANNED_MINUTES: u32 = 30;

fn active_file_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{14})\.txt$").expect("static regex"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RestrictionType {
    /// Checkpoints still expected, only the introspection check is relaxed
    Flexible,
    /// Every anomaly check is off until the planned duration runs out
    Strict,
}

impl RestrictionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flexible => "flexible",
            Self::Strict => "strict",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s.trim() {
            "flexible" => Some(Self::Flexible),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepWorkDeclaration {
    pub heartbeat_id: HeartbeatId,
    pub restriction: RestrictionType,
    pub description: String,
    pub planned_minutes: Option<u32>,
}

impl DeepWorkDeclaration {
    pub fn validate(&self) -> Result<()> {
        let len = self.description.chars().count();
        if len < MIN_DESCRIPTION_CHARS {
            return Err(HeartbeatError::InvalidInput(format!(
                "activityDescription must be at least {} characters (got {})",
                MIN_DESCRIPTION_CHARS, len
            )));
        }
        if len > MAX_DESCRIPTION_CHARS {
            return Err(HeartbeatError::InvalidInput(format!(
                "activityDescription must be at most {} characters (got {})",
                MAX_DESCRIPTION_CHARS, len
            )));
        }
        match (self.restriction, self.planned_minutes) {
            (_, Some(m)) if m == 0 || m > MAX_PLANNED_MINUTES => Err(HeartbeatError::InvalidInput(format!(
                "plannedDurationMinutes must be between 1 and {} (got {})",
                MAX_PLANNED_MINUTES, m
            ))),
            (RestrictionType::Strict, None) => Err(HeartbeatError::InvalidInput(
                "plannedDurationMinutes is required in strict mode".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn render(&self) -> String {
        let mut out = format!(
            "restriction: {}\ndescription: {}\n",
            self.restriction.as_str(),
            self.description.replace('\n', " ")
        );
        if let Some(m) = self.planned_minutes {
            out.push_str(&format!("planned_minutes: {}\n", m));
        }
        out
    }

    /// Inverse of `render`. Unknown or missing restriction reads as flexible.
    fn parse(heartbeat_id: HeartbeatId, text: &str) -> Self {
        let mut decl = Self {
            heartbeat_id,
            restriction: RestrictionType::Flexible,
            description: String::new(),
            planned_minutes: None,
        };
        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else { continue };
            match key.trim() {
                "restriction" => {
                    if let Some(r) = RestrictionType::from_str(value) {
                        decl.restriction = r;
                    }
                }
                "description" => decl.description = value.trim().to_string(),
                "planned_minutes" => decl.planned_minutes = value.trim().parse().ok(),
                _ => {}
            }
        }
        decl
    }

    /// Strict declarations lapse once their planned duration has passed.
    fn suppresses_at(&self, now: &DateTime<Local>) -> bool {
        match (self.restriction, self.planned_minutes) {
            (RestrictionType::Strict, Some(minutes)) => match self.heartbeat_id.elapsed_since(now) {
                Ok(elapsed) => elapsed < i64::from(minutes) * 60,
                Err(_) => true,
            },
            _ => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeepWorkStarted {
    pub declaration: DeepWorkDeclaration,
    pub path: PathBuf,
    pub expired: Vec<HeartbeatId>,
}

impl DeepWorkStarted {
    pub fn message(&self, layout: &Layout) -> String {
        let decl = &self.declaration;
        let mut text = format!(
            "Deep work declared ({} mode)\nActivity: {}",
            decl.restriction.as_str(),
            decl.description
        );
        if let Some(m) = decl.planned_minutes {
            text.push_str(&format!("\nPlanned duration: {} minutes", m));
        }
        text.push_str(&format!("\nDeclaration file: {}", layout.display_path(&self.path)));
        if !self.expired.is_empty() {
            text.push('\n');
            for id in &self.expired {
                text.push_str(&format!("\nExpired the previous deep work declaration (heartbeat ID: {})", id));
            }
        }
        text.push_str("\n\n");
        text.push_str(&advice(decl.restriction, decl.planned_minutes));
        text.push_str("\n\nImportant: once the deep work is done, follow up with an introspection activity.");
        text
    }
}

fn advice(restriction: RestrictionType, planned_minutes: Option<u32>) -> String {
    match restriction {
        RestrictionType::Flexible => "Flexible mode:\n\
             - Activity logs may pause for now\n\
             - Keep creating checkpoints with the checkpoint tool at reasonable intervals\n\
             - The missing-introspection check is disabled\n\
             - The declaration is released automatically by the next activity log"
            .to_string(),
        RestrictionType::Strict => format!(
            "Strict mode:\n\
             - All anomaly checks are disabled for the planned {} minutes\n\
             - Checkpoints are not required\n\
             - Write an activity log within the planned time to complete normally\n\
             - Past the planned time the declaration lapses and anomaly checks resume",
            planned_minutes.unwrap_or(0)
        ),
    }
}

/// Active declarations, sorted by heartbeat id.
pub fn active_declarations(layout: &Layout) -> Result<Vec<(HeartbeatId, PathBuf)>> {
    let dir = layout.deep_work();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in std::fs::read_dir(&dir).at("Failed to read", &dir)? {
        let entry = entry.at("Failed to read", &dir)?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(caps) = active_file_pattern().captures(name) else { continue };
        match HeartbeatId::parse(&caps[1]) {
            Ok(id) => found.push((id, entry.path())),
            Err(e) => tracing::warn!(file = %name, error = %e, "Ignoring deep work file with bad id"),
        }
    }
    found.sort();
    Ok(found)
}

pub fn any_active(layout: &Layout) -> Result<bool> {
    Ok(!active_declarations(layout)?.is_empty())
}

/// Whether a declaration for `id` currently suppresses duration advisories.
pub fn is_active_for(layout: &Layout, id: &HeartbeatId, now: &DateTime<Local>) -> Result<bool> {
    let path = declaration_path(layout, id);
    if !path.exists() {
        return Ok(false);
    }
    let text = std::fs::read_to_string(&path).at("Failed to read", &path)?;
    Ok(DeepWorkDeclaration::parse(id.clone(), &text).suppresses_at(now))
}

fn declaration_path(layout: &Layout, id: &HeartbeatId) -> PathBuf {
    layout.deep_work().join(format!("{}.txt", id))
}

fn rename_with_suffix(path: &Path, id: &HeartbeatId, suffix: &str) -> Result<()> {
    let target = path.with_file_name(format!("{}.{}.txt", id, suffix));
    std::fs::rename(path, &target).at("Failed to rename", path)
}

/// Declare deep work for `decl.heartbeat_id`, expiring any other active
/// declaration first.
pub fn start_deep_work(layout: &Layout, decl: DeepWorkDeclaration) -> Result<DeepWorkStarted> {
    decl.validate()?;

    let dir = layout.deep_work();
    std::fs::create_dir_all(&dir).at("Failed to create", &dir)?;

    let mut expired = Vec::new();
    for (id, path) in active_declarations(layout)? {
        if id == decl.heartbeat_id {
            continue;
        }
        rename_with_suffix(&path, &id, "expired")?;
        tracing::info!(heartbeat_id = %id, "Expired deep work declaration");
        expired.push(id);
    }

    let path = declaration_path(layout, &decl.heartbeat_id);
    std::fs::write(&path, decl.render()).at("Failed to write", &path)?;
    tracing::info!(
        heartbeat_id = %decl.heartbeat_id,
        restriction = decl.restriction.as_str(),
        "Deep work declared"
    );

    Ok(DeepWorkStarted { declaration: decl, path, expired })
}

/// Mark every active declaration completed. Returns the ids that were completed.
pub fn complete_active(layout: &Layout) -> Result<Vec<HeartbeatId>> {
    let mut completed = Vec::new();
    for (id, path) in active_declarations(layout)? {
        rename_with_suffix(&path, &id, "completed")?;
        tracing::info!(heartbeat_id = %id, "Completed deep work declaration");
        completed.push(id);
    }
    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn decl(id: &str, restriction: RestrictionType, minutes: Option<u32>) -> DeepWorkDeclaration {
        DeepWorkDeclaration {
            heartbeat_id: HeartbeatId::parse(id).unwrap(),
            restriction,
            description: "Refactoring the parser module".to_string(),
            planned_minutes: minutes,
        }
    }

    #[test]
    fn test_validation() {
        assert!(decl("20250101120000", RestrictionType::Flexible, None).validate().is_ok());
        assert!(decl("20250101120000", RestrictionType::Strict, Some(30)).validate().is_ok());

        let err = decl("20250101120000", RestrictionType::Strict, None).validate().unwrap_err();
        assert!(err.to_string().contains("strict"));
        assert!(decl("20250101120000", RestrictionType::Strict, Some(31)).validate().is_err());
        assert!(decl("20250101120000", RestrictionType::Flexible, Some(0)).validate().is_err());

        let mut short = decl("20250101120000", RestrictionType::Flexible, None);
        short.description = "too short".into();
        assert!(short.validate().is_err());
        let mut long = short.clone();
        long.description = "x".repeat(201);
        assert!(long.validate().is_err());
    }

    #[test]
    fn test_start_expires_other_declarations() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());

        start_deep_work(&layout, decl("20250101110000", RestrictionType::Flexible, None)).unwrap();
        let started = start_deep_work(&layout, decl("20250101120000", RestrictionType::Strict, Some(20))).unwrap();

        assert_eq!(started.expired.len(), 1);
        assert!(layout.deep_work().join("20250101110000.expired.txt").exists());
        assert!(layout.deep_work().join("20250101120000.txt").exists());
        let active = active_declarations(&layout).unwrap();
        assert_eq!(active.len(), 1);
        assert!(started.message(&layout).contains("Strict mode"));
    }

    #[test]
    fn test_redeclaring_same_id_keeps_it() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        start_deep_work(&layout, decl("20250101120000", RestrictionType::Flexible, None)).unwrap();
        let again = start_deep_work(&layout, decl("20250101120000", RestrictionType::Flexible, None)).unwrap();
        assert!(again.expired.is_empty());
        assert!(any_active(&layout).unwrap());
    }

    #[test]
    fn test_complete_all_active() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        std::fs::create_dir_all(layout.deep_work()).unwrap();
        std::fs::write(layout.deep_work().join("20250101110000.txt"), "restriction: flexible\n").unwrap();
        std::fs::write(layout.deep_work().join("20250101120000.txt"), "restriction: flexible\n").unwrap();
        std::fs::write(layout.deep_work().join("20250101100000.completed.txt"), "").unwrap();

        let completed = complete_active(&layout).unwrap();
        assert_eq!(completed.len(), 2);
        assert!(!any_active(&layout).unwrap());
        assert!(layout.deep_work().join("20250101110000.completed.txt").exists());
        assert!(layout.deep_work().join("20250101120000.completed.txt").exists());
    }

    #[test]
    fn test_strict_declaration_lapses() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        let d = decl("20250101120000", RestrictionType::Strict, Some(10));
        let id = d.heartbeat_id.clone();
        start_deep_work(&layout, d).unwrap();

        let start = id.to_local().unwrap();
        assert!(is_active_for(&layout, &id, &(start + Duration::minutes(9))).unwrap());
        assert!(!is_active_for(&layout, &id, &(start + Duration::minutes(11))).unwrap());
    }

    #[test]
    fn test_flexible_declaration_only_covers_its_id() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        let d = decl("20250101120000", RestrictionType::Flexible, None);
        let id = d.heartbeat_id.clone();
        start_deep_work(&layout, d).unwrap();

        let later = id.to_local().unwrap() + Duration::hours(2);
        assert!(is_active_for(&layout, &id, &later).unwrap());
        let other = HeartbeatId::parse("20250101130000").unwrap();
        assert!(!is_active_for(&layout, &other, &later).unwrap());
    }

    #[test]
    fn test_render_parse_round_trip() {
        let d = decl("20250101120000", RestrictionType::Strict, Some(15));
        let parsed = DeepWorkDeclaration::parse(d.heartbeat_id.clone(), &d.render());
        assert_eq!(parsed, d);
    }
}
