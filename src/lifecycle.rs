//! Theme lifecycle: NotStarted → Active → Completed.
//!
//! Every start or end leaves a record in `artifacts/theme_histories/` named
//! `{heartbeatId}_{start|end}_{part}.md`. At most one such operation may run
//! per heartbeat; a second attempt is reported as a rule violation and
//! changes nothing.
//!
//! `start_theme` and `end_theme` write through `{record}.tmp`, re-check the
//! target and rename. A failed start removes everything it created.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HeartbeatError, IoContext, Result};
use crate::heartbeat_id::HeartbeatId;
use crate::inbox;
use crate::paths::{self, is_degenerate_part, sanitize_directory_part, Layout, ThemeDir, ThemeRef, HISTORIES_DIR};
use crate::session::SessionContext;
use crate::timing;
use crate::utils::{format_list, or_placeholder};

const TMP_SUFFIX: &str = ".tmp";

/// Result of a lifecycle operation that may be refused by the
/// one-operation-per-heartbeat rule.
#[derive(Debug, Clone)]
pub enum LifecycleOutcome<T> {
    Completed(T),
    /// Nothing was written. The message tells the caller to wait for the next cycle.
    RuleViolation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ThemeAction {
    Start,
    End,
}

impl ThemeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
        }
    }
}

// ─── Guard ───────────────────────────────────────────────────────────────────

/// Existing history record stamped with `id`, if any (`theme_histories/{id}_*.md`).
pub fn find_operation_for_heartbeat(layout: &Layout, id: &HeartbeatId) -> Result<Option<String>> {
    let dir = layout.theme_histories();
    if !dir.is_dir() {
        return Ok(None);
    }
    let prefix = format!("{}_", id);
    let mut matches = Vec::new();
    for entry in std::fs::read_dir(&dir).at("Failed to read", &dir)? {
        let entry = entry.at("Failed to read", &dir)?;
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with(&prefix) && name.ends_with(".md") {
                matches.push(name.to_string());
            }
        }
    }
    matches.sort();
    Ok(matches.into_iter().next())
}

fn rule_violation(existing: &str) -> String {
    format!(
        "Rule violation: a theme operation has already been performed in this activity cycle ({}), \
         so this operation was not executed.\n\
         Wait for the next heartbeat and retry in a new activity cycle.",
        existing
    )
}

fn history_record_path(layout: &Layout, id: &HeartbeatId, action: ThemeAction, part: &str) -> PathBuf {
    layout
        .theme_histories()
        .join(format!("{}_{}_{}.md", id, action.as_str(), part))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

// ─── Record rendering ────────────────────────────────────────────────────────

fn record_header(theme: &ThemeRef, action: ThemeAction, name: &str) -> String {
    let verb = match action {
        ThemeAction::Start => "Start",
        ThemeAction::End => "End",
    };
    let mut out = format!("# {} {}: {}\n\n", theme.kind(), verb, name);
    if let Some(parent) = &theme.parent {
        out.push_str(&format!("**PARENT_THEME_START_ID**: {}\n", parent.start_id));
        out.push_str(&format!("**PARENT_THEME_DIRECTORY**: {}\n", parent.dir_name()));
    }
    out.push_str(&format!("**THEME_START_ID**: {}\n", theme.theme.start_id));
    out
}

fn render_start_record(theme: &ThemeRef, name: &str, reason: &str, activity_content: &[String]) -> String {
    let mut out = record_header(theme, ThemeAction::Start, name);
    out.push_str(&format!("**THEME_DIRECTORY**: `{}/`\n\n", theme.relative_path().display()));
    out.push_str(&format!("**Reason**:\n{}\n\n", or_placeholder(reason, "N/A")));
    out.push_str(&format!(
        "**Activity Plan**:\n{}\n",
        format_list(activity_content, "(what this theme will work on)")
    ));
    out
}

fn render_end_record(theme: &ThemeRef, end_id: &HeartbeatId, name: &str, reason: &str, achievements: &[String]) -> String {
    let mut out = record_header(theme, ThemeAction::End, name);
    out.push_str(&format!("**THEME_END_ID**: {}\n", end_id));
    out.push_str(&format!("**THEME_DIRECTORY**: `{}/`\n\n", theme.relative_path().display()));
    out.push_str(&format!("**Reason**:\n{}\n\n", or_placeholder(reason, "N/A")));
    out.push_str(&format!("**Achievements**:\n{}\n", format_list(achievements, "N/A")));
    out
}

// ─── Rollback ────────────────────────────────────────────────────────────────

/// Paths created so far by a start, removed in reverse order on failure.
#[derive(Default)]
struct Rollback {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl Rollback {
    fn run(&self) {
        for file in self.files.iter().rev() {
            if file.exists() {
                if let Err(e) = std::fs::remove_file(file) {
                    tracing::error!(path = %file.display(), error = %e, "Rollback failed to remove file");
                }
            }
        }
        for dir in self.dirs.iter().rev() {
            if dir.is_dir() {
                if let Err(e) = std::fs::remove_dir_all(dir) {
                    tracing::error!(path = %dir.display(), error = %e, "Rollback failed to remove directory");
                }
            }
        }
    }
}

fn discard_tmp(tmp: &Path) {
    if let Err(e) = std::fs::remove_file(tmp) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %tmp.display(), error = %e, "Failed to remove temporary history record");
        }
    }
}

// ─── start_theme ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StartThemeRequest {
    /// Themebox item consumed by this start
    pub target_filename: String,
    pub theme_name: String,
    /// Raw directory part; sanitized here
    pub directory_part: String,
    pub reason: String,
    pub activity_content: Vec<String>,
    /// Parent start id and raw parent directory part, for a subtheme
    pub parent: Option<(HeartbeatId, String)>,
}

#[derive(Debug, Clone)]
pub struct ThemeStarted {
    pub theme: ThemeRef,
    pub history_path: PathBuf,
    pub warnings: Vec<String>,
}

impl ThemeStarted {
    pub fn message(&self, layout: &Layout) -> String {
        let kind = self.theme.kind();
        let mut text = format!("{} started successfully.\n", kind);
        text.push_str(&format!("{} history file: {}\n", kind, layout.display_path(&self.history_path)));
        text.push_str(&format!("{} directory: {}\n", kind, self.theme.relative_path().display()));
        text.push_str(&format!("THEME_START_ID: {}", self.theme.theme.start_id));
        if let Some(parent) = &self.theme.parent {
            text.push_str(&format!("\nPARENT_THEME_START_ID: {}", parent.start_id));
        }
        for w in &self.warnings {
            text.push('\n');
            text.push_str(w);
        }
        text
    }
}

pub fn start_theme(ctx: &SessionContext, req: &StartThemeRequest) -> Result<LifecycleOutcome<ThemeStarted>> {
    let layout = &ctx.layout;

    // 1. inbox item
    if paths::base_name(&req.target_filename) != req.target_filename {
        return Err(HeartbeatError::InvalidInput(format!(
            "target_filename must be a plain file name: {}",
            req.target_filename
        )));
    }
    let themebox = layout.themebox();
    inbox::ensure_pending(&themebox, &req.target_filename)?;

    // 2. one operation per heartbeat
    let start_id = ctx.now_id();
    if let Some(existing) = find_operation_for_heartbeat(layout, &start_id)? {
        tracing::warn!(heartbeat_id = %start_id, existing = %existing, "Theme start refused");
        return Ok(LifecycleOutcome::RuleViolation(rule_violation(&existing)));
    }

    // 3. names and parent
    let part = sanitize_directory_part(&req.directory_part);
    if is_degenerate_part(&part) {
        return Err(HeartbeatError::InvalidInput(format!(
            "themeDirectoryPart '{}' has no usable characters after sanitizing",
            req.directory_part
        )));
    }
    let theme = ThemeRef {
        theme: ThemeDir { start_id: start_id.clone(), part },
        parent: req.parent.as_ref().map(|(id, p)| ThemeDir::new(id.clone(), p)),
    };
    if let Some(parent_rel) = theme.parent_relative_path() {
        if !layout.join(&parent_rel).is_dir() {
            return Err(HeartbeatError::ParentThemeMissing(parent_rel));
        }
    }

    let mut warnings = Vec::new();
    warnings.extend(paths::sanitize_notice("directory name", &req.directory_part, &theme.theme.part));
    if let (Some((_, raw)), Some(parent)) = (&req.parent, &theme.parent) {
        warnings.extend(paths::sanitize_notice("parent directory name", raw, &parent.part));
    }

    let mut rollback = Rollback::default();
    match write_start(layout, &theme, req, &mut rollback) {
        Ok(history_path) => {
            tracing::info!(
                theme = %theme.relative_path().display(),
                item = %req.target_filename,
                "Theme started"
            );
            Ok(LifecycleOutcome::Completed(ThemeStarted { theme, history_path, warnings }))
        }
        Err(e) => {
            rollback.run();
            tracing::warn!(error = %e, "Theme start rolled back");
            Err(e)
        }
    }
}

/// Steps 4-7 of a start. Everything created is registered in `rollback`.
fn write_start(layout: &Layout, theme: &ThemeRef, req: &StartThemeRequest, rollback: &mut Rollback) -> Result<PathBuf> {
    let record = history_record_path(layout, &theme.theme.start_id, ThemeAction::Start, &theme.theme.part);
    let tmp = tmp_path(&record);

    let histories_root = layout.theme_histories();
    std::fs::create_dir_all(&histories_root).at("Failed to create", &histories_root)?;
    rollback.files.push(tmp.clone());
    let content = render_start_record(theme, &req.theme_name, &req.reason, &req.activity_content);
    std::fs::write(&tmp, content).at("Failed to write", &tmp)?;

    let theme_dir = layout.theme_dir(theme);
    let preexisting = theme_dir.is_dir();
    std::fs::create_dir_all(&theme_dir).at("Failed to create theme directory", &theme_dir)?;
    if !preexisting {
        rollback.dirs.push(theme_dir.clone());
    }
    let histories = theme_dir.join(HISTORIES_DIR);
    std::fs::create_dir_all(&histories).at("Failed to create", &histories)?;

    if record.exists() {
        return Err(HeartbeatError::HistoryExists(record));
    }
    std::fs::rename(&tmp, &record).at("Failed to rename", &tmp)?;
    rollback.files.push(record.clone());

    inbox::mark_processed(&layout.themebox(), &req.target_filename)?;
    Ok(record)
}

// ─── end_theme ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EndThemeRequest {
    pub theme: ThemeRef,
    pub theme_name: String,
    pub reason: String,
    pub achievements: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ThemeEnded {
    pub theme: ThemeRef,
    pub end_id: HeartbeatId,
    pub history_path: PathBuf,
    pub warnings: Vec<String>,
}

impl ThemeEnded {
    pub fn message(&self, layout: &Layout) -> String {
        let kind = self.theme.kind();
        let mut text = format!("{} history file created: {}\n", kind, layout.display_path(&self.history_path));
        text.push_str(&format!("{} ended: {} → {}", kind, self.theme.theme.start_id, self.end_id));
        if let Some(parent) = &self.theme.parent {
            text.push_str(&format!("\nReturning to parent theme: {}", parent.dir_name()));
        }
        for w in &self.warnings {
            text.push('\n');
            text.push_str(w);
        }
        text.push_str("\n\nThe theme is complete.");
        text.push_str("\nNext, write the activity log for this theme-end activity and finish the turn.");
        text.push_str("\n\nImportant: start any new theme in the next activity cycle, after the next heartbeat.");
        text
    }
}

pub fn end_theme(ctx: &SessionContext, req: &EndThemeRequest) -> Result<LifecycleOutcome<ThemeEnded>> {
    let layout = &ctx.layout;
    let end_id = ctx.now_id();
    if let Some(existing) = find_operation_for_heartbeat(layout, &end_id)? {
        tracing::warn!(heartbeat_id = %end_id, existing = %existing, "Theme end refused");
        return Ok(LifecycleOutcome::RuleViolation(rule_violation(&existing)));
    }

    let theme = &req.theme;
    let record = history_record_path(layout, &end_id, ThemeAction::End, &theme.theme.part);
    let tmp = tmp_path(&record);
    let histories_root = layout.theme_histories();
    std::fs::create_dir_all(&histories_root).at("Failed to create", &histories_root)?;

    let content = render_end_record(theme, &end_id, &req.theme_name, &req.reason, &req.achievements);
    std::fs::write(&tmp, content).at("Failed to write", &tmp)?;
    if record.exists() {
        discard_tmp(&tmp);
        return Err(HeartbeatError::HistoryExists(record));
    }
    if let Err(e) = std::fs::rename(&tmp, &record) {
        discard_tmp(&tmp);
        return Err(HeartbeatError::io("Failed to rename", &tmp, e));
    }

    let mut warnings = Vec::new();
    if !layout.theme_dir(theme).is_dir() {
        tracing::warn!(theme = %theme.relative_path().display(), "Ended theme has no directory");
        warnings.push(format!(
            "Warning: theme directory not found: {}",
            theme.relative_path().display()
        ));
    }
    tracing::info!(theme = %theme.relative_path().display(), end_id = %end_id, "Theme ended");

    Ok(LifecycleOutcome::Completed(ThemeEnded {
        theme: theme.clone(),
        end_id,
        history_path: record,
        warnings,
    }))
}

// ─── create_theme_log ────────────────────────────────────────────────────────

/// Legacy single-call record writer with explicit ids.
#[derive(Debug, Clone)]
pub struct ThemeLogRequest {
    pub action: ThemeAction,
    pub theme_start_id: HeartbeatId,
    pub theme_end_id: Option<HeartbeatId>,
    pub theme_name: String,
    pub directory_part: String,
    pub reason: String,
    pub achievements: Vec<String>,
    pub activity_content: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ThemeLogWritten {
    pub action: ThemeAction,
    pub theme: ThemeRef,
    pub end_id: Option<HeartbeatId>,
    pub history_path: PathBuf,
    pub warnings: Vec<String>,
}

impl ThemeLogWritten {
    pub fn message(&self, layout: &Layout) -> String {
        let mut text = format!("Theme history file created: {}", layout.display_path(&self.history_path));
        match (&self.action, &self.end_id) {
            (ThemeAction::End, Some(end_id)) => {
                text.push_str(&format!("\n🏁 Theme ended: {} → {}", self.theme.theme.start_id, end_id));
            }
            _ => {
                text.push_str(&format!("\n📁 Theme directory: {}", self.theme.relative_path().display()));
                text.push_str(&format!("\n🆔 THEME_START_ID: {}", self.theme.theme.start_id));
            }
        }
        for w in &self.warnings {
            text.push('\n');
            text.push_str(w);
        }
        text
    }
}

pub fn create_theme_log(ctx: &SessionContext, req: &ThemeLogRequest) -> Result<LifecycleOutcome<ThemeLogWritten>> {
    let layout = &ctx.layout;
    let record_id = match (req.action, &req.theme_end_id) {
        (ThemeAction::Start, _) => req.theme_start_id.clone(),
        (ThemeAction::End, Some(end_id)) => end_id.clone(),
        (ThemeAction::End, None) => {
            return Err(HeartbeatError::MissingCompanion { given: "action=end", missing: "themeEndId" })
        }
    };

    let part = sanitize_directory_part(&req.directory_part);
    if req.action == ThemeAction::Start && is_degenerate_part(&part) {
        return Err(HeartbeatError::InvalidInput(format!(
            "themeDirectoryPart '{}' has no usable characters after sanitizing",
            req.directory_part
        )));
    }
    let theme = ThemeRef::top_level(ThemeDir { start_id: req.theme_start_id.clone(), part });

    if let Some(existing) = find_operation_for_heartbeat(layout, &record_id)? {
        tracing::warn!(heartbeat_id = %record_id, existing = %existing, "Theme log refused");
        return Ok(LifecycleOutcome::RuleViolation(rule_violation(&existing)));
    }

    let mut warnings = Vec::new();
    let deviation = timing::check_time_deviation(&record_id, &ctx.now, ctx.settings.timestamp_anomaly_threshold)?;
    warnings.extend(deviation.message());
    warnings.extend(paths::sanitize_notice("directory name", &req.directory_part, &theme.theme.part));

    let theme_dir = layout.theme_dir(&theme);
    let content = match req.action {
        ThemeAction::Start => render_start_record(&theme, &req.theme_name, &req.reason, &req.activity_content),
        ThemeAction::End => {
            if !theme_dir.is_dir() {
                warnings.push(format!(
                    "Warning: theme directory not found: {}",
                    theme.relative_path().display()
                ));
            }
            render_end_record(&theme, &record_id, &req.theme_name, &req.reason, &req.achievements)
        }
    };

    let record = history_record_path(layout, &record_id, req.action, &theme.theme.part);
    let histories_root = layout.theme_histories();
    std::fs::create_dir_all(&histories_root).at("Failed to create", &histories_root)?;

    let mut rollback = Rollback::default();
    if req.action == ThemeAction::Start {
        if !theme_dir.exists() {
            rollback.dirs.push(theme_dir.clone());
        }
        let histories = theme_dir.join(HISTORIES_DIR);
        if let Err(e) = std::fs::create_dir_all(&histories) {
            rollback.run();
            return Err(HeartbeatError::io("Failed to create", &histories, e));
        }
    }
    if let Err(e) = std::fs::write(&record, content) {
        rollback.run();
        return Err(HeartbeatError::io("Failed to write", &record, e));
    }
    tracing::info!(path = %layout.display_path(&record), action = req.action.as_str(), "Theme log written");

    Ok(LifecycleOutcome::Completed(ThemeLogWritten {
        action: req.action,
        theme,
        end_id: req.theme_end_id.clone().filter(|_| req.action == ThemeAction::End),
        history_path: record,
        warnings,
    }))
}
