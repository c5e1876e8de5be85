//! Activity logs: `artifacts/{theme}/histories/{heartbeatId}[_NN].md`.
//!
//! Writing a log is the main liveness signal of a heartbeat cycle. It also
//! releases any deep-work declaration, so the write and the release happen in
//! the same call.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};

use crate::deep_work;
use crate::error::{HeartbeatError, IoContext, Result};
use crate::heartbeat_id::HeartbeatId;
use crate::paths::{Layout, ThemeRef, HISTORIES_DIR};
use crate::sequence::{self, activity_log_path, parse_log_filename};
use crate::session::SessionContext;
use crate::timing::{self, DurationAdvisory};

const TITLE_PREFIX: &str = "# Heartbeat Log: ";
const TYPE_HEADER: &str = "## Activity Type";
const CONTENT_HEADER: &str = "## Activity Content";
const ARTIFACTS_HEADER: &str = "## Artifacts";
const EVALUATION_HEADER: &str = "## Evaluation";

const NO_CONTENT: &str = "No specific activity content";
const NO_ARTIFACTS: &str = "None";
const NO_EVALUATION: &str = "Nothing in particular";

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityType {
    Observation,
    Thinking,
    Creation,
    Introspection,
    ThemeStart,
    ThemeEnd,
    Recovery,
    Other,
}

impl ActivityType {
    pub const ALL: [ActivityType; 8] = [
        Self::Observation,
        Self::Thinking,
        Self::Creation,
        Self::Introspection,
        Self::ThemeStart,
        Self::ThemeEnd,
        Self::Recovery,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observation => "observation",
            Self::Thinking => "thinking",
            Self::Creation => "creation",
            Self::Introspection => "introspection",
            Self::ThemeStart => "theme-start",
            Self::ThemeEnd => "theme-end",
            Self::Recovery => "recovery",
            Self::Other => "other",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == label.trim())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum AuxiliaryOperation {
    FileReading,
    LightSearch,
    LightReplacement,
    WebSearch,
    Other,
}

impl AuxiliaryOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileReading => "file-reading",
            Self::LightSearch => "light-search",
            Self::LightReplacement => "light-replacement",
            Self::WebSearch => "web-search",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActivityLogRequest {
    pub heartbeat_id: HeartbeatId,
    pub theme: ThemeRef,
    pub activity_type: ActivityType,
    pub activity_content: Vec<String>,
    pub artifacts: Vec<String>,
    pub evaluation: String,
    pub auxiliary_operations: Vec<AuxiliaryOperation>,
}

/// Result of `create_activity_log`. `warnings` and `notices` are appended to
/// the tool response in that order.
#[derive(Debug, Clone)]
pub struct ActivityLogCreated {
    pub path: PathBuf,
    pub sequence: Option<u8>,
    pub warnings: Vec<String>,
    pub completed_deep_work: Vec<HeartbeatId>,
}

impl ActivityLogCreated {
    pub fn message(&self, layout: &Layout, theme: &ThemeRef) -> String {
        let mut text = format!("Activity log created: {}", layout.display_path(&self.path));
        text.push_str(&format!("\n📁 {}: {} ({})", theme.kind(), theme.theme.part, theme.theme.start_id));
        for warning in &self.warnings {
            text.push('\n');
            text.push_str(warning);
        }
        for id in &self.completed_deep_work {
            text.push_str(&format!("\nDeep work declaration completed (heartbeat ID: {})", id));
        }
        text
    }
}

/// One activity log read back from disk.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityLogInfo {
    pub heartbeat_id: HeartbeatId,
    pub sequence: Option<u8>,
    /// Base activity type as written. Older logs may carry labels outside
    /// `ActivityType`, so this stays a string.
    pub activity_type: String,
    pub activity_content: Vec<String>,
    pub artifacts: Vec<String>,
    pub evaluation: String,
    pub filename: String,
}

/// An activity-log file located on disk, without its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub path: PathBuf,
    pub heartbeat_id: String,
    pub sequence: Option<u8>,
}

impl LogFile {
    fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let (heartbeat_id, sequence) = parse_log_filename(name)?;
        Some(Self { path: path.to_path_buf(), heartbeat_id, sequence })
    }

    fn sort_key(&self) -> (&str, u8) {
        (&self.heartbeat_id, self.sequence.unwrap_or(0))
    }

    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

// ─── Rendering ───────────────────────────────────────────────────────────────

pub fn render_markdown(req: &ActivityLogRequest) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.push(format!("{}{}", TITLE_PREFIX, req.heartbeat_id));
    lines.push(String::new());

    lines.push(TYPE_HEADER.to_string());
    let mut type_line = req.activity_type.as_str().to_string();
    if !req.auxiliary_operations.is_empty() {
        let ops: Vec<&str> = req.auxiliary_operations.iter().map(|o| o.as_str()).collect();
        type_line.push_str(&format!(" ({} used)", ops.join(", ")));
    }
    lines.push(type_line);
    lines.push(String::new());

    lines.push(CONTENT_HEADER.to_string());
    if req.activity_content.is_empty() {
        lines.push(NO_CONTENT.to_string());
    } else {
        lines.extend(req.activity_content.iter().map(|c| format!("- {}", c)));
    }
    lines.push(String::new());

    lines.push(ARTIFACTS_HEADER.to_string());
    if req.artifacts.is_empty() {
        lines.push(NO_ARTIFACTS.to_string());
    } else {
        lines.extend(req.artifacts.iter().map(|a| format!("- {}", a)));
    }
    lines.push(String::new());

    lines.push(EVALUATION_HEADER.to_string());
    if req.evaluation.trim().is_empty() {
        lines.push(NO_EVALUATION.to_string());
    } else {
        lines.push(req.evaluation.clone());
    }
    lines.push(String::new());

    lines.join("\n")
}

// ─── Creation ────────────────────────────────────────────────────────────────

pub fn create_activity_log(ctx: &SessionContext, req: &ActivityLogRequest) -> Result<ActivityLogCreated> {
    let elapsed = timing::ensure_not_future(&req.heartbeat_id, &ctx.now)?;

    let theme_dir = ctx.layout.theme_dir(&req.theme);
    if !theme_dir.is_dir() {
        return Err(HeartbeatError::ThemeDirectoryMissing(req.theme.relative_path()));
    }

    for artifact in &req.artifacts {
        if !ctx.layout.join(artifact).exists() {
            return Err(HeartbeatError::ArtifactMissing(PathBuf::from(artifact)));
        }
    }

    let histories = theme_dir.join(HISTORIES_DIR);
    let seq = sequence::find_available_sequence(&histories, &req.heartbeat_id)?;

    let mut warnings = Vec::new();
    if let Some(n) = seq {
        warnings.push(format!("⚠️ {}", sequence::sequence_warning(&req.heartbeat_id, n)));
    }
    let deviation = timing::check_time_deviation(
        &req.heartbeat_id,
        &ctx.now,
        ctx.settings.timestamp_anomaly_threshold,
    )?;
    if let Some(msg) = deviation.message() {
        warnings.push(msg);
    }
    let deep_work_active = deep_work::is_active_for(&ctx.layout, &req.heartbeat_id, &ctx.now)?;
    match timing::classify_duration(elapsed, deep_work_active) {
        DurationAdvisory::Suppressed => {}
        advisory => warnings.extend(advisory.message(elapsed)),
    }

    std::fs::create_dir_all(&histories).at("Failed to create", &histories)?;
    let path = activity_log_path(&histories, &req.heartbeat_id, seq);
    std::fs::write(&path, render_markdown(req)).at("Failed to write", &path)?;
    tracing::info!(
        path = %ctx.layout.display_path(&path),
        activity_type = req.activity_type.as_str(),
        "Activity log written"
    );

    // The log is already on disk, so completion failures only warn
    let completed_deep_work = match deep_work::complete_active(&ctx.layout) {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!(error = %e, "Deep work completion failed after writing activity log");
            warnings.push(format!(
                "⚠️ The activity log was written, but active deep work declarations could not be completed: {}",
                e
            ));
            Vec::new()
        }
    };

    Ok(ActivityLogCreated { path, sequence: seq, warnings, completed_deep_work })
}

// ─── Parsing ─────────────────────────────────────────────────────────────────

/// Lines between `header` and the next `## ` heading, trimmed, blanks dropped.
fn section<'a>(lines: &[&'a str], header: &str) -> Vec<&'a str> {
    let Some(start) = lines.iter().position(|l| l.trim() == header) else {
        return Vec::new();
    };
    lines[start + 1..]
        .iter()
        .take_while(|l| !l.trim().starts_with("## "))
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect()
}

fn list_items(lines: &[&str], header: &str) -> Vec<String> {
    section(lines, header)
        .into_iter()
        .filter_map(|l| l.strip_prefix("- "))
        .map(str::trim)
        .filter(|item| !item.is_empty() && *item != NO_ARTIFACTS)
        .map(str::to_string)
        .collect()
}

/// Base type: text before any "(... used)" suffix.
fn base_activity_type(text: &str) -> String {
    let base = text.split('(').next().unwrap_or("").trim();
    if base.is_empty() {
        ActivityType::Other.as_str().to_string()
    } else {
        base.to_string()
    }
}

pub fn parse_activity_log(path: &Path) -> Result<ActivityLogInfo> {
    let malformed = |reason: String| HeartbeatError::MalformedLog { path: path.to_path_buf(), reason };

    let file = LogFile::from_path(path).ok_or_else(|| malformed("not an activity log filename".into()))?;
    let content = std::fs::read_to_string(path).at("Failed to read", path)?;
    let lines: Vec<&str> = content.lines().collect();

    for header in [TYPE_HEADER, CONTENT_HEADER, ARTIFACTS_HEADER, EVALUATION_HEADER] {
        if !lines.iter().any(|l| l.trim() == header) {
            return Err(malformed(format!("missing section '{}'", header)));
        }
    }

    let heading_id = lines
        .iter()
        .find_map(|l| l.trim().strip_prefix(TITLE_PREFIX))
        .map(str::trim)
        .ok_or_else(|| malformed("missing title".into()))?;
    if heading_id != file.heartbeat_id {
        return Err(malformed(format!(
            "heartbeat ID mismatch: filename {} vs content {}",
            file.heartbeat_id, heading_id
        )));
    }
    let heartbeat_id = HeartbeatId::parse(&file.heartbeat_id)?;

    let activity_type = base_activity_type(&section(&lines, TYPE_HEADER).join(" "));
    let activity_content = list_items(&lines, CONTENT_HEADER);
    let artifacts = list_items(&lines, ARTIFACTS_HEADER);
    let evaluation = section(&lines, EVALUATION_HEADER).join("\n");

    Ok(ActivityLogInfo {
        heartbeat_id,
        sequence: file.sequence,
        activity_type,
        activity_content,
        artifacts,
        evaluation,
        filename: file.filename(),
    })
}

/// Parse every activity log in `histories_dir`, newest first. Files that fail
/// to parse are logged and skipped.
pub fn parse_histories(histories_dir: &Path) -> Result<Vec<ActivityLogInfo>> {
    let mut parsed = Vec::new();
    for file in list_activity_logs(histories_dir)? {
        match parse_activity_log(&file.path) {
            Ok(info) => parsed.push(info),
            Err(e) => tracing::warn!(error = %e, "Skipping unreadable activity log"),
        }
    }
    Ok(parsed)
}

// ─── Lookup ──────────────────────────────────────────────────────────────────

/// Activity-log files directly in `histories_dir`, newest first by `(id, seq)`.
/// A missing directory yields an empty list.
pub fn list_activity_logs(histories_dir: &Path) -> Result<Vec<LogFile>> {
    if !histories_dir.exists() {
        return Ok(Vec::new());
    }
    let mut logs = Vec::new();
    for entry in std::fs::read_dir(histories_dir).at("Failed to read", histories_dir)? {
        let entry = entry.at("Failed to read", histories_dir)?;
        if let Some(log) = LogFile::from_path(&entry.path()) {
            logs.push(log);
        }
    }
    logs.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
    Ok(logs)
}

/// Newest activity log in one histories directory, together with the number
/// of candidate files considered.
pub fn latest_activity_log(histories_dir: &Path, include_sequenced: bool) -> Result<Option<(LogFile, usize)>> {
    let mut logs = list_activity_logs(histories_dir)?;
    if !include_sequenced {
        logs.retain(|l| l.sequence.is_none());
    }
    let total = logs.len();
    Ok(logs.into_iter().next().map(|latest| (latest, total)))
}

/// Newest activity log anywhere under `artifacts/**/histories/`.
pub fn latest_activity_log_anywhere(layout: &Layout) -> Result<Option<LogFile>> {
    let artifacts = layout.artifacts();
    if !artifacts.exists() {
        return Ok(None);
    }

    let walker = WalkBuilder::new(&artifacts)
        .hidden(true)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .require_git(false)
        .build();

    let mut latest: Option<LogFile> = None;
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping entry");
                continue;
            }
        };
        let path = entry.path();
        let in_histories = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n == HISTORIES_DIR)
            .unwrap_or(false);
        if !in_histories || !path.is_file() {
            continue;
        }
        let Some(log) = LogFile::from_path(path) else { continue };
        if latest.as_ref().map_or(true, |cur| log.sort_key() > cur.sort_key()) {
            latest = Some(log);
        }
    }
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deep_work::{DeepWorkDeclaration, RestrictionType};
    use crate::paths::ThemeDir;
    use crate::settings::Settings;
    use chrono::Duration;

    fn theme() -> ThemeRef {
        ThemeRef::top_level(ThemeDir::new(HeartbeatId::parse("20250101100000").unwrap(), "demo"))
    }

    fn request(id: &str) -> ActivityLogRequest {
        ActivityLogRequest {
            heartbeat_id: HeartbeatId::parse(id).unwrap(),
            theme: theme(),
            activity_type: ActivityType::Thinking,
            activity_content: vec!["Sketched the parser".into(), "Read the notes".into()],
            artifacts: vec![],
            evaluation: "Good progress".into(),
            auxiliary_operations: vec![AuxiliaryOperation::FileReading, AuxiliaryOperation::WebSearch],
        }
    }

    /// Working root with the demo theme directory and a clock `offset` seconds after `id`.
    fn setup(id: &str, offset: i64) -> (tempfile::TempDir, SessionContext) {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        std::fs::create_dir_all(layout.theme_dir(&theme())).unwrap();
        let now = HeartbeatId::parse(id).unwrap().to_local().unwrap() + Duration::seconds(offset);
        let ctx = SessionContext::new(layout, Settings::default(), now);
        (tmp, ctx)
    }

    #[test]
    fn test_render_sections() {
        let md = render_markdown(&request("20250101120000"));
        assert!(md.starts_with("# Heartbeat Log: 20250101120000\n"));
        assert!(md.contains("## Activity Type\nthinking (file-reading, web-search used)\n"));
        assert!(md.contains("- Sketched the parser\n- Read the notes"));
        assert!(md.contains("## Artifacts\nNone\n"));
        assert!(md.contains("## Evaluation\nGood progress\n"));
    }

    #[test]
    fn test_create_and_parse_back() {
        let (_tmp, ctx) = setup("20250101120000", 30);
        let req = request("20250101120000");
        let created = create_activity_log(&ctx, &req).unwrap();
        assert_eq!(created.sequence, None);
        assert!(created.warnings.is_empty());
        assert!(created.path.ends_with("histories/20250101120000.md"));

        let info = parse_activity_log(&created.path).unwrap();
        assert_eq!(info.activity_type, "thinking");
        assert_eq!(info.activity_content.len(), 2);
        assert!(info.artifacts.is_empty());
        assert_eq!(info.evaluation, "Good progress");
    }

    #[test]
    fn test_second_log_gets_sequence() {
        let (_tmp, ctx) = setup("20250101120000", 30);
        let req = request("20250101120000");
        create_activity_log(&ctx, &req).unwrap();
        let second = create_activity_log(&ctx, &req).unwrap();
        assert_eq!(second.sequence, Some(1));
        assert!(second.path.ends_with("20250101120000_01.md"));
        assert!(second.warnings[0].contains("sequence 01"));
    }

    #[test]
    fn test_future_id_rejected_before_write() {
        let (_tmp, ctx) = setup("20250101120000", -600);
        let err = create_activity_log(&ctx, &request("20250101120000")).unwrap_err();
        assert!(matches!(err, HeartbeatError::FutureHeartbeatId { .. }));
        let histories = ctx.layout.theme_dir(&theme()).join(HISTORIES_DIR);
        assert!(list_activity_logs(&histories).unwrap().is_empty());
    }

    #[test]
    fn test_missing_theme_and_artifact() {
        let (_tmp, ctx) = setup("20250101120000", 30);
        let mut req = request("20250101120000");
        req.theme = ThemeRef::top_level(ThemeDir::new(HeartbeatId::parse("20250101100000").unwrap(), "other"));
        assert!(matches!(
            create_activity_log(&ctx, &req),
            Err(HeartbeatError::ThemeDirectoryMissing(_))
        ));

        let mut req = request("20250101120000");
        req.artifacts = vec!["artifacts/20250101100000_demo/missing.md".into()];
        assert!(matches!(create_activity_log(&ctx, &req), Err(HeartbeatError::ArtifactMissing(_))));
    }

    #[test]
    fn test_duration_advisory_and_deep_work() {
        let (_tmp, ctx) = setup("20250101120000", 700);
        let created = create_activity_log(&ctx, &request("20250101120000")).unwrap();
        assert!(created.warnings.iter().any(|w| w.contains("Activity split recommended")));

        let (_tmp, ctx) = setup("20250101120000", 700);
        deep_work::start_deep_work(
            &ctx.layout,
            DeepWorkDeclaration {
                heartbeat_id: HeartbeatId::parse("20250101120000").unwrap(),
                restriction: RestrictionType::Flexible,
                description: "Long running refactor".into(),
                planned_minutes: None,
            },
        )
        .unwrap();
        let created = create_activity_log(&ctx, &request("20250101120000")).unwrap();
        assert!(!created.warnings.iter().any(|w| w.contains("minutes have passed")));
        assert_eq!(created.completed_deep_work.len(), 1);
        assert!(!deep_work::any_active(&ctx.layout).unwrap());
    }

    #[test]
    fn test_log_kept_when_deep_work_completion_fails() {
        let (_tmp, ctx) = setup("20250101120000", 30);
        let dir = ctx.layout.deep_work();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("20250101110000.txt"), "restriction: flexible\n").unwrap();
        // A non-empty directory at the rename target makes the completion rename fail
        let blocker = dir.join("20250101110000.completed.txt");
        std::fs::create_dir_all(&blocker).unwrap();
        std::fs::write(blocker.join("keep"), "").unwrap();

        let created = create_activity_log(&ctx, &request("20250101120000")).unwrap();
        assert!(created.path.exists());
        assert_eq!(created.sequence, None);
        assert!(created.completed_deep_work.is_empty());
        assert!(created.warnings.iter().any(|w| w.contains("could not be completed")));
    }

    #[test]
    fn test_parse_rejects_id_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("20250101120000.md");
        let mut md = render_markdown(&request("20250101120000"));
        md = md.replace("# Heartbeat Log: 20250101120000", "# Heartbeat Log: 20250101130000");
        std::fs::write(&path, md).unwrap();
        assert!(matches!(parse_activity_log(&path), Err(HeartbeatError::MalformedLog { .. })));
    }

    #[test]
    fn test_latest_in_theme() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        for name in ["20250101120000.md", "20250101120000_01.md", "20250101110000.md", "notes.md"] {
            std::fs::write(dir.join(name), "").unwrap();
        }
        let (latest, total) = latest_activity_log(dir, true).unwrap().unwrap();
        assert_eq!(latest.filename(), "20250101120000_01.md");
        assert_eq!(total, 3);

        let (latest, total) = latest_activity_log(dir, false).unwrap().unwrap();
        assert_eq!(latest.filename(), "20250101120000.md");
        assert_eq!(total, 2);

        assert!(latest_activity_log(&dir.join("missing"), true).unwrap().is_none());
    }

    #[test]
    fn test_latest_anywhere_spans_subthemes() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        let a = layout.artifacts().join("20250101100000_a/histories");
        let b = layout.artifacts().join("20250101100000_a/subthemes/20250101110000_b/histories");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        std::fs::write(a.join("20250101120000.md"), "").unwrap();
        std::fs::write(b.join("20250101123000.md"), "").unwrap();
        // Not in a histories directory
        std::fs::write(layout.artifacts().join("20250101100000_a/20250101130000.md"), "").unwrap();

        let latest = latest_activity_log_anywhere(&layout).unwrap().unwrap();
        assert_eq!(latest.heartbeat_id, "20250101123000");
    }
}
