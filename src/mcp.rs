//! MCP (Model Context Protocol) server for the heartbeat workflow.
//! Provides 15 tools: activity logs, theme lifecycle, inboxes, deep work,
//! checkpoints, expert contexts, theme status and tool usage.
//! Launch: `heartbeat-cli mcp-server --stdio [--root <dir>]`
//!
//! Every tool takes `Parameters<T>` with a `Deserialize + JsonSchema` struct;
//! plain structs don't satisfy the `#[tool_router]` extractor bounds in rmcp 0.15.
//!
//! Domain errors never become protocol faults: each one is returned as a text
//! result with `is_error` set.

use std::time::Instant;

use rmcp::{
    RoleServer, ServerHandler, ServiceExt,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    service::RequestContext,
    tool, tool_handler, tool_router,
    transport::stdio,
    ErrorData as McpError,
};
use serde::Serialize;

use crate::activity_log::{self, ActivityLogRequest, ActivityType, AuxiliaryOperation};
use crate::checkpoint;
use crate::context::{self, ExpertContext};
use crate::deep_work::{self, DeepWorkDeclaration, RestrictionType};
use crate::error::HeartbeatError;
use crate::heartbeat_id::HeartbeatId;
use crate::inbox::{self, InboxKind, ProcessOutcome};
use crate::lifecycle::{
    self, EndThemeRequest, LifecycleOutcome, StartThemeRequest, ThemeAction, ThemeLogRequest,
};
use crate::paths::{self, Layout, ThemeRef, HISTORIES_DIR};
use crate::session::SessionContext;
use crate::settings::Settings;
use crate::theme_status::{self, StatusOptions, DEFAULT_RECENT_ACTIVITY_COUNT};
use crate::timing;
use crate::tool_usage::{self, ToolUsageStatus};
use crate::utils::safe_truncate;

const LOG_ARGS_MAX: usize = 200;

// ─── Parameter Structs ───────────────────────────────────────────────────────

#[derive(serde::Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
struct CreateActivityLogParams {
    /// Heartbeat ID (YYYYMMDDHHMMSS). A second log for the same ID gets a _NN suffix
    heartbeat_id: String,
    /// Kind of activity performed
    activity_type: ActivityType,
    /// Short descriptions of what was done
    activity_content: Vec<String>,
    /// Paths of files created or modified, relative to the working root
    artifacts: Option<Vec<String>>,
    /// Self-evaluation or remarks
    evaluation: Option<String>,
    /// Auxiliary operations used during the activity
    auxiliary_operations: Option<Vec<AuxiliaryOperation>>,
    /// THEME_START_ID of the current theme
    theme_start_id: String,
    /// Directory part of the current theme; the directory is "{themeStartId}_{themeDirectoryPart}"
    theme_directory_part: String,
    /// For a subtheme: THEME_START_ID of the parent theme
    parent_theme_start_id: Option<String>,
    /// For a subtheme: directory part of the parent theme
    parent_theme_directory_part: Option<String>,
}

#[derive(serde::Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
struct LatestActivityLogParams {
    /// THEME_START_ID of the theme
    theme_start_id: String,
    /// Directory part of the theme
    theme_directory_part: String,
    /// For a subtheme: THEME_START_ID of the parent theme
    parent_theme_start_id: Option<String>,
    /// For a subtheme: directory part of the parent theme
    parent_theme_directory_part: Option<String>,
    /// Also consider sequenced files (_01, _02, ...). Default: true
    include_sequenced: Option<bool>,
}

#[derive(serde::Deserialize, schemars::JsonSchema)]
struct PreviewParams {}

#[derive(serde::Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
struct StartThemeParams {
    /// Themebox file name returned by preview_next_theme
    #[serde(rename = "target_filename")]
    target_filename: String,
    /// Full name of the theme
    theme_name: String,
    /// Directory part; sanitized to [a-z0-9_] and combined as "{THEME_START_ID}_{part}"
    theme_directory_part: String,
    /// Why this theme is being started
    reason: String,
    /// Initial activity plan
    activity_content: Option<Vec<String>>,
    /// For a subtheme: THEME_START_ID of the parent theme
    parent_theme_start_id: Option<String>,
    /// For a subtheme: directory part of the parent theme
    parent_theme_directory_part: Option<String>,
}

#[derive(serde::Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
struct EndThemeParams {
    /// THEME_START_ID of the theme to end
    theme_start_id: String,
    /// Directory part of the theme to end
    theme_directory_part: String,
    /// Full name of the theme
    theme_name: String,
    /// Why the theme is ending
    reason: String,
    /// Main achievements of the theme
    achievements: Option<Vec<String>>,
    /// For a subtheme: THEME_START_ID of the parent theme
    parent_theme_start_id: Option<String>,
    /// For a subtheme: directory part of the parent theme
    parent_theme_directory_part: Option<String>,
}

#[derive(serde::Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
struct ThemeLogParams {
    /// "start" or "end"
    action: ThemeAction,
    /// THEME_START_ID, required for both actions
    theme_start_id: String,
    /// THEME_END_ID, required when action is "end"
    theme_end_id: Option<String>,
    /// Full name of the theme
    theme_name: String,
    /// Directory part of the theme
    theme_directory_part: String,
    /// Why the theme is starting or ending
    reason: String,
    /// Achievements, used when action is "end"
    achievements: Option<Vec<String>>,
    /// Initial activity plan, used when action is "start"
    activity_content: Option<Vec<String>>,
}

#[derive(serde::Deserialize, schemars::JsonSchema)]
struct ProcessItemParams {
    /// Which box to check: "feedbackbox" (default) or "themebox"
    #[serde(rename = "type")]
    kind: Option<InboxKind>,
}

#[derive(serde::Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
struct ReportToolUsageParams {
    /// Unique tool ID, e.g. "gemini.google.search". Letters, digits, '_', '.', '-'
    tool_id: String,
    /// "success" starts a cooldown; "quota_exceeded" sets a lock
    status: ToolUsageStatus,
}

#[derive(serde::Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
struct ExpertContextParams {
    /// Full name of the theme
    theme_name: String,
    /// THEME_START_ID of the theme
    theme_start_id: String,
    /// Directory part of the theme
    theme_directory_part: String,
    /// For a subtheme: THEME_START_ID of the parent theme
    parent_theme_start_id: Option<String>,
    /// For a subtheme: directory part of the parent theme
    parent_theme_directory_part: Option<String>,
    /// Heartbeat ID naming the context file. Default: the current heartbeat
    heartbeat_id: Option<String>,
    /// The expert role for this theme
    expert_role: String,
    /// Expert perspective and approach, as points
    expert_perspective: Vec<String>,
    /// Constraints and cautions, as points
    constraints: Vec<String>,
    /// Expected outcome, as points
    expected_outcome: Vec<String>,
}

#[derive(serde::Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
struct ThemeParams {
    /// THEME_START_ID of the theme
    theme_start_id: String,
    /// Directory part of the theme
    theme_directory_part: String,
    /// For a subtheme: THEME_START_ID of the parent theme
    parent_theme_start_id: Option<String>,
    /// For a subtheme: directory part of the parent theme
    parent_theme_directory_part: Option<String>,
}

#[derive(serde::Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
struct ThemeStatusParams {
    /// THEME_START_ID of the theme
    theme_start_id: String,
    /// Directory part of the theme
    theme_directory_part: String,
    /// For a subtheme: THEME_START_ID of the parent theme
    parent_theme_start_id: Option<String>,
    /// For a subtheme: directory part of the parent theme
    parent_theme_directory_part: Option<String>,
    /// Include distributions and recent patterns (default: true)
    include_detailed_stats: Option<bool>,
    /// Activities used for the recent pattern, 3-20 (default: 10)
    recent_activity_count: Option<usize>,
}

#[derive(serde::Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
struct ListArtifactsParams {
    /// THEME_START_ID of the theme
    theme_start_id: String,
    /// Directory part of the theme
    theme_directory_part: String,
    /// For a subtheme: THEME_START_ID of the parent theme
    parent_theme_start_id: Option<String>,
    /// For a subtheme: directory part of the parent theme
    parent_theme_directory_part: Option<String>,
    /// Descend into subdirectories (default: true)
    include_subdirectories: Option<bool>,
}

#[derive(serde::Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
struct StartDeepWorkParams {
    /// Heartbeat ID (YYYYMMDDHHMMSS) the declaration belongs to
    heartbeat_id: String,
    /// "flexible" allows checkpoints; "strict" means no interruptions at all
    restriction_type: RestrictionType,
    /// What the deep work is about, 10-200 characters
    activity_description: String,
    /// Planned minutes, 1-30. Required in strict mode
    planned_duration_minutes: Option<u32>,
}

#[derive(serde::Deserialize, schemars::JsonSchema)]
struct CheckpointParams {
    /// Brief note on the current activity, e.g. "surveying parser crates"
    current_activity: String,
}

#[derive(serde::Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
struct ElapsedParams {
    /// Heartbeat ID (YYYYMMDDHHMMSS) to measure from
    heartbeat_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ElapsedReport {
    elapsed_seconds: i64,
    elapsed_formatted: String,
    warning_message: Option<String>,
}

// ─── Tools ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Tools {
    tool_router: ToolRouter<Self>,
    layout: Layout,
    settings: Settings,
}

impl Tools {
    /// Fresh clock and current-heartbeat snapshot for one call.
    fn session(&self) -> SessionContext {
        SessionContext::capture(&self.layout, &self.settings)
    }

    fn tool_error(msg: impl Into<String>) -> CallToolResult {
        let mut result = CallToolResult::success(vec![Content::text(msg.into())]);
        result.is_error = Some(true);
        result
    }

    fn tool_failed(e: HeartbeatError) -> CallToolResult {
        if e.is_validation() {
            tracing::debug!(error = %e, "Tool input rejected");
        } else {
            tracing::warn!(error = %e, "Tool failed");
        }
        Self::tool_error(format!("Error: {}", e))
    }

    fn tool_text(text: impl Into<String>) -> CallToolResult {
        CallToolResult::success(vec![Content::text(text.into())])
    }

    fn tool_ok(value: &impl Serialize) -> CallToolResult {
        let json = serde_json::to_string_pretty(value).unwrap_or_default();
        CallToolResult::success(vec![Content::text(json)])
    }

    fn rule_violation(msg: String) -> CallToolResult {
        tracing::info!("Theme operation refused by the one-per-heartbeat rule");
        Self::tool_text(msg)
    }

    fn theme(
        start_id: &str,
        part: &str,
        parent_start_id: Option<&String>,
        parent_part: Option<&String>,
    ) -> Result<ThemeRef, HeartbeatError> {
        ThemeRef::from_parts(
            start_id,
            part,
            parent_start_id.map(String::as_str),
            parent_part.map(String::as_str),
        )
    }
}

// ─── Tool Implementations ────────────────────────────────────────────────────

#[tool_router]
impl Tools {
    fn new(layout: Layout, settings: Settings) -> Self {
        Self {
            tool_router: Self::tool_router(),
            layout,
            settings,
        }
    }

    // ── Activity logs ────────────────────────────────────────────────────

    #[tool(description = "Create an activity log for a heartbeat inside the current theme's histories/. \
        Adds a _NN suffix when a log for the same heartbeat exists, and warns about time deviation and long heartbeats.")]
    async fn create_activity_log(
        &self,
        Parameters(p): Parameters<CreateActivityLogParams>,
    ) -> Result<CallToolResult, McpError> {
        let ctx = self.session();
        let heartbeat_id = match HeartbeatId::parse(&p.heartbeat_id) {
            Ok(id) => id,
            Err(e) => return Ok(Self::tool_failed(e)),
        };
        let theme = match Self::theme(
            &p.theme_start_id,
            &p.theme_directory_part,
            p.parent_theme_start_id.as_ref(),
            p.parent_theme_directory_part.as_ref(),
        ) {
            Ok(t) => t,
            Err(e) => return Ok(Self::tool_failed(e)),
        };
        let req = ActivityLogRequest {
            heartbeat_id,
            theme,
            activity_type: p.activity_type,
            activity_content: p.activity_content,
            artifacts: p.artifacts.unwrap_or_default(),
            evaluation: p.evaluation.unwrap_or_default(),
            auxiliary_operations: p.auxiliary_operations.unwrap_or_default(),
        };
        match activity_log::create_activity_log(&ctx, &req) {
            Ok(created) => Ok(Self::tool_text(created.message(&ctx.layout, &req.theme))),
            Err(e) => Ok(Self::tool_failed(e)),
        }
    }

    #[tool(description = "Read the newest activity log of a theme. Useful for reviewing past work or continuing a line of thought.")]
    async fn get_latest_activity_log(
        &self,
        Parameters(p): Parameters<LatestActivityLogParams>,
    ) -> Result<CallToolResult, McpError> {
        let theme = match Self::theme(
            &p.theme_start_id,
            &p.theme_directory_part,
            p.parent_theme_start_id.as_ref(),
            p.parent_theme_directory_part.as_ref(),
        ) {
            Ok(t) => t,
            Err(e) => return Ok(Self::tool_failed(e)),
        };
        let theme_dir = self.layout.theme_dir(&theme);
        if !theme_dir.is_dir() {
            return Ok(Self::tool_failed(HeartbeatError::ThemeDirectoryMissing(theme.relative_path())));
        }
        let histories = theme_dir.join(HISTORIES_DIR);
        if !histories.is_dir() {
            return Ok(Self::tool_text(format!(
                "No histories directory yet: {}\nNo activity log has been written for this theme.",
                self.layout.display_path(&histories)
            )));
        }

        let include_sequenced = p.include_sequenced.unwrap_or(true);
        let (latest, total) = match activity_log::latest_activity_log(&histories, include_sequenced) {
            Ok(Some(found)) => found,
            Ok(None) if include_sequenced => {
                return Ok(Self::tool_text(format!(
                    "No activity logs found in {}",
                    self.layout.display_path(&histories)
                )))
            }
            Ok(None) => {
                return Ok(Self::tool_text(format!(
                    "No unsequenced activity logs found in {} (sequenced files were excluded)",
                    self.layout.display_path(&histories)
                )))
            }
            Err(e) => return Ok(Self::tool_failed(e)),
        };
        let content = match std::fs::read_to_string(&latest.path) {
            Ok(c) => c,
            Err(e) => return Ok(Self::tool_failed(HeartbeatError::io("Failed to read", &latest.path, e))),
        };
        let sequence = latest
            .sequence
            .map(|n| format!(" (sequence: {:02})", n))
            .unwrap_or_default();
        Ok(Self::tool_text(format!(
            "Latest activity log:\n📁 {}: {} ({})\n📄 File: {}{}\n📍 Path: {}\n📊 Activity logs: {}\n\n---\n\n{}",
            theme.kind(),
            theme.theme.part,
            theme.theme.start_id,
            latest.filename(),
            sequence,
            self.layout.display_path(&latest.path),
            total,
            content
        )))
    }

    // ── Themebox & feedbackbox ───────────────────────────────────────────

    #[tool(description = "Show the next themebox item without changing anything. Pass the returned filename to start_theme.")]
    async fn preview_next_theme(
        &self,
        Parameters(_p): Parameters<PreviewParams>,
    ) -> Result<CallToolResult, McpError> {
        match inbox::preview_next(&self.layout, InboxKind::Themebox) {
            Ok(Some(item)) => Ok(Self::tool_text(format!(
                "Next theme candidate: {}\n\n---\n\n{}\n\n---\n\nRemaining candidates after this one: {}\n\
                 (Preview only; nothing was changed. Call start_theme with target_filename \"{}\" to begin.)",
                item.filename, item.content, item.remaining, item.filename
            ))),
            Ok(None) => Ok(Self::tool_text("No theme candidates in the themebox.")),
            Err(e) => Ok(Self::tool_failed(e)),
        }
    }

    #[tool(description = "Take the next feedbackbox (or themebox) item: return its content and mark it processed.")]
    async fn check_and_process_item(
        &self,
        Parameters(p): Parameters<ProcessItemParams>,
    ) -> Result<CallToolResult, McpError> {
        let kind = p.kind.unwrap_or(InboxKind::Feedbackbox);
        match inbox::process_next(&self.layout, kind) {
            Ok(ProcessOutcome::Created) => Ok(Self::tool_text(format!(
                "Created the missing {} directory. No items to process.",
                kind.as_str()
            ))),
            Ok(ProcessOutcome::Empty) => Ok(Self::tool_text(format!("No items in the {}.", kind.as_str()))),
            Ok(ProcessOutcome::Processed(item)) => Ok(Self::tool_text(format!(
                "Processed {} item: {}\nRemaining items: {}\n\n---\n\n{}",
                kind.as_str(),
                item.filename,
                item.remaining,
                item.content
            ))),
            Err(e) => Ok(Self::tool_failed(e)),
        }
    }

    // ── Theme lifecycle ──────────────────────────────────────────────────

    #[tool(description = "Start a theme (or subtheme) from a themebox item. THEME_START_ID is the current time. \
        Only one theme start or end is allowed per heartbeat.")]
    async fn start_theme(
        &self,
        Parameters(p): Parameters<StartThemeParams>,
    ) -> Result<CallToolResult, McpError> {
        let ctx = self.session();
        let parent = match paths::parent_parts(
            p.parent_theme_start_id.as_deref(),
            p.parent_theme_directory_part.as_deref(),
        ) {
            Ok(parent) => parent.map(|(id, part)| (id, part.to_string())),
            Err(e) => return Ok(Self::tool_failed(e)),
        };
        let req = StartThemeRequest {
            target_filename: p.target_filename,
            theme_name: p.theme_name,
            directory_part: p.theme_directory_part,
            reason: p.reason,
            activity_content: p.activity_content.unwrap_or_default(),
            parent,
        };
        match lifecycle::start_theme(&ctx, &req) {
            Ok(LifecycleOutcome::Completed(started)) => Ok(Self::tool_text(started.message(&ctx.layout))),
            Ok(LifecycleOutcome::RuleViolation(msg)) => Ok(Self::rule_violation(msg)),
            Err(e) => Ok(Self::tool_failed(e)),
        }
    }

    #[tool(description = "End a theme (or subtheme). THEME_END_ID is the current time. \
        Only one theme start or end is allowed per heartbeat.")]
    async fn end_theme(
        &self,
        Parameters(p): Parameters<EndThemeParams>,
    ) -> Result<CallToolResult, McpError> {
        let ctx = self.session();
        let theme = match Self::theme(
            &p.theme_start_id,
            &p.theme_directory_part,
            p.parent_theme_start_id.as_ref(),
            p.parent_theme_directory_part.as_ref(),
        ) {
            Ok(t) => t,
            Err(e) => return Ok(Self::tool_failed(e)),
        };
        let req = EndThemeRequest {
            theme,
            theme_name: p.theme_name,
            reason: p.reason,
            achievements: p.achievements.unwrap_or_default(),
        };
        match lifecycle::end_theme(&ctx, &req) {
            Ok(LifecycleOutcome::Completed(ended)) => Ok(Self::tool_text(ended.message(&ctx.layout))),
            Ok(LifecycleOutcome::RuleViolation(msg)) => Ok(Self::rule_violation(msg)),
            Err(e) => Ok(Self::tool_failed(e)),
        }
    }

    #[tool(description = "Write a theme start or end record with explicit IDs (legacy form of start_theme/end_theme).")]
    async fn create_theme_log(
        &self,
        Parameters(p): Parameters<ThemeLogParams>,
    ) -> Result<CallToolResult, McpError> {
        let ctx = self.session();
        let theme_start_id = match HeartbeatId::parse(&p.theme_start_id) {
            Ok(id) => id,
            Err(e) => return Ok(Self::tool_failed(e)),
        };
        let theme_end_id = match p.theme_end_id.as_deref().map(HeartbeatId::parse).transpose() {
            Ok(id) => id,
            Err(e) => return Ok(Self::tool_failed(e)),
        };
        let req = ThemeLogRequest {
            action: p.action,
            theme_start_id,
            theme_end_id,
            theme_name: p.theme_name,
            directory_part: p.theme_directory_part,
            reason: p.reason,
            achievements: p.achievements.unwrap_or_default(),
            activity_content: p.activity_content.unwrap_or_default(),
        };
        match lifecycle::create_theme_log(&ctx, &req) {
            Ok(LifecycleOutcome::Completed(written)) => Ok(Self::tool_text(written.message(&ctx.layout))),
            Ok(LifecycleOutcome::RuleViolation(msg)) => Ok(Self::rule_violation(msg)),
            Err(e) => Ok(Self::tool_failed(e)),
        }
    }

    // ── Expert contexts ──────────────────────────────────────────────────

    #[tool(description = "Write a theme expert context (role, perspective, constraints, expected outcome) \
        to the theme's contexts/{heartbeatId}.md.")]
    async fn create_theme_expert_context(
        &self,
        Parameters(p): Parameters<ExpertContextParams>,
    ) -> Result<CallToolResult, McpError> {
        let ctx = self.session();
        let theme = match Self::theme(
            &p.theme_start_id,
            &p.theme_directory_part,
            p.parent_theme_start_id.as_ref(),
            p.parent_theme_directory_part.as_ref(),
        ) {
            Ok(t) => t,
            Err(e) => return Ok(Self::tool_failed(e)),
        };
        let heartbeat_id = match p.heartbeat_id.as_deref() {
            Some(raw) => HeartbeatId::parse(raw),
            None => ctx.require_heartbeat().cloned(),
        };
        let heartbeat_id = match heartbeat_id {
            Ok(id) => id,
            Err(e) => return Ok(Self::tool_failed(e)),
        };
        let expert = ExpertContext {
            theme_name: p.theme_name,
            expert_role: p.expert_role,
            expert_perspective: p.expert_perspective,
            constraints: p.constraints,
            expected_outcome: p.expected_outcome,
        };
        match context::create_expert_context(&ctx.layout, &theme, &heartbeat_id, &expert) {
            Ok(path) => Ok(Self::tool_text(format!(
                "Success: theme expert context written: {}",
                ctx.layout.display_path(&path)
            ))),
            Err(e) => Ok(Self::tool_failed(e)),
        }
    }

    #[tool(description = "Read the newest theme expert context (contexts/ ordered by heartbeat ID, \
        falling back to a legacy context.md).")]
    async fn get_latest_theme_context(
        &self,
        Parameters(p): Parameters<ThemeParams>,
    ) -> Result<CallToolResult, McpError> {
        let theme = match Self::theme(
            &p.theme_start_id,
            &p.theme_directory_part,
            p.parent_theme_start_id.as_ref(),
            p.parent_theme_directory_part.as_ref(),
        ) {
            Ok(t) => t,
            Err(e) => return Ok(Self::tool_failed(e)),
        };
        match context::latest_theme_context(&self.layout, &theme) {
            Ok(Some(found)) => Ok(Self::tool_text(format!(
                "Path: {}\n\n---\n\n{}",
                self.layout.display_path(&found.path),
                found.content
            ))),
            Ok(None) => Ok(Self::tool_text(format!(
                "No expert context found for {}. None has been created for this theme yet.",
                theme.relative_path().display()
            ))),
            Err(e) => Ok(Self::tool_failed(e)),
        }
    }

    // ── Theme status ─────────────────────────────────────────────────────

    #[tool(description = "Report a theme's state (active or completed), duration, activity statistics and artifact statistics as JSON.")]
    async fn check_theme_status(
        &self,
        Parameters(p): Parameters<ThemeStatusParams>,
    ) -> Result<CallToolResult, McpError> {
        let ctx = self.session();
        let theme = match Self::theme(
            &p.theme_start_id,
            &p.theme_directory_part,
            p.parent_theme_start_id.as_ref(),
            p.parent_theme_directory_part.as_ref(),
        ) {
            Ok(t) => t,
            Err(e) => return Ok(Self::tool_failed(e)),
        };
        let opts = StatusOptions {
            include_detailed_stats: p.include_detailed_stats.unwrap_or(true),
            recent_activity_count: p.recent_activity_count.unwrap_or(DEFAULT_RECENT_ACTIVITY_COUNT),
        };
        match theme_status::check_theme_status(&ctx, &theme, opts) {
            Ok(status) => Ok(Self::tool_ok(&status)),
            Err(e) => Ok(Self::tool_failed(e)),
        }
    }

    #[tool(description = "List artifact files of a theme, sorted, relative to the working root. histories/ and hidden or temporary files are skipped.")]
    async fn list_theme_artifacts(
        &self,
        Parameters(p): Parameters<ListArtifactsParams>,
    ) -> Result<CallToolResult, McpError> {
        let theme = match Self::theme(
            &p.theme_start_id,
            &p.theme_directory_part,
            p.parent_theme_start_id.as_ref(),
            p.parent_theme_directory_part.as_ref(),
        ) {
            Ok(t) => t,
            Err(e) => return Ok(Self::tool_failed(e)),
        };
        let include_subdirectories = p.include_subdirectories.unwrap_or(true);
        match theme_status::list_theme_artifacts(&self.layout, &theme, include_subdirectories) {
            Ok(files) if files.is_empty() => Ok(Self::tool_text(format!(
                "No artifact files in {}",
                theme.relative_path().display()
            ))),
            Ok(files) => {
                let lines: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();
                Ok(Self::tool_text(lines.join("\n")))
            }
            Err(e) => Ok(Self::tool_failed(e)),
        }
    }

    // ── Deep work & checkpoints ──────────────────────────────────────────

    #[tool(description = "Declare deep work for a heartbeat. Suppresses elapsed-time advisories until the next activity log; \
        strict mode requires plannedDurationMinutes (max 30).")]
    async fn start_deep_work(
        &self,
        Parameters(p): Parameters<StartDeepWorkParams>,
    ) -> Result<CallToolResult, McpError> {
        let heartbeat_id = match HeartbeatId::parse(&p.heartbeat_id) {
            Ok(id) => id,
            Err(e) => return Ok(Self::tool_failed(e)),
        };
        let decl = DeepWorkDeclaration {
            heartbeat_id,
            restriction: p.restriction_type,
            description: p.activity_description,
            planned_minutes: p.planned_duration_minutes,
        };
        match deep_work::start_deep_work(&self.layout, decl) {
            Ok(started) => Ok(Self::tool_text(started.message(&self.layout))),
            Err(e) => Ok(Self::tool_failed(e)),
        }
    }

    #[tool(description = "Record a checkpoint for the current heartbeat to show work is continuing without writing an activity log.")]
    async fn checkpoint(
        &self,
        Parameters(p): Parameters<CheckpointParams>,
    ) -> Result<CallToolResult, McpError> {
        let ctx = self.session();
        match checkpoint::checkpoint(&ctx, &p.current_activity) {
            Ok(written) => Ok(Self::tool_text(written.message(&ctx))),
            Err(e) => Ok(Self::tool_failed(e)),
        }
    }

    #[tool(description = "Elapsed time since a heartbeat started, with the same advisories as create_activity_log (notice at 5 minutes, split at 10).")]
    async fn get_heartbeat_elapsed_time(
        &self,
        Parameters(p): Parameters<ElapsedParams>,
    ) -> Result<CallToolResult, McpError> {
        let ctx = self.session();
        let heartbeat_id = match HeartbeatId::parse(&p.heartbeat_id) {
            Ok(id) => id,
            Err(e) => return Ok(Self::tool_failed(e)),
        };
        let elapsed = match timing::ensure_not_future(&heartbeat_id, &ctx.now) {
            Ok(s) => s,
            Err(e) => return Ok(Self::tool_failed(e)),
        };
        let deep_work_active = match deep_work::is_active_for(&ctx.layout, &heartbeat_id, &ctx.now) {
            Ok(active) => active,
            Err(e) => return Ok(Self::tool_failed(e)),
        };
        Ok(Self::tool_ok(&ElapsedReport {
            elapsed_seconds: elapsed,
            elapsed_formatted: timing::format_offset(elapsed),
            warning_message: timing::classify_duration(elapsed, deep_work_active).message(elapsed),
        }))
    }

    // ── Tool usage ───────────────────────────────────────────────────────

    #[tool(description = "Report use of a rate-limited tool. 'success' starts a cooldown, 'quota_exceeded' sets a lock.")]
    async fn report_tool_usage(
        &self,
        Parameters(p): Parameters<ReportToolUsageParams>,
    ) -> Result<CallToolResult, McpError> {
        match tool_usage::report_tool_usage(&self.layout, &p.tool_id, p.status) {
            Ok(_) => Ok(Self::tool_text(format!(
                "Success: Recorded '{}' status for tool [{}].",
                p.status.as_str(),
                p.tool_id
            ))),
            Err(e) => Ok(Self::tool_failed(e)),
        }
    }
}

// ─── ServerHandler ───────────────────────────────────────────────────────────

#[tool_handler]
impl ServerHandler for Tools {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(format!("AI heartbeat workflow (inner). Root: {}", self.layout.root().display())),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Wrapper that logs every tool call to stderr.
pub struct McpServer {
    inner: Tools,
}

impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(format!(
                "AI heartbeat workflow. Root: {}. \
                 Use these tools to record activity logs, run the theme lifecycle and manage deep work.",
                self.inner.layout.root().display()
            )),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        request: Option<PaginatedRequestParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        self.inner.list_tools(request, context).await
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let name = request.name.to_string();
        let args = request
            .arguments
            .as_ref()
            .map(|a| serde_json::Value::Object(a.clone()).to_string())
            .unwrap_or_default();
        tracing::debug!(tool = %name, args = safe_truncate(&args, LOG_ARGS_MAX), "Tool call");

        let started = Instant::now();
        let result = self.inner.call_tool(request, context).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(r) if r.is_error == Some(true) => {
                tracing::info!(tool = %name, elapsed_ms, "Tool returned an error result")
            }
            Ok(_) => tracing::info!(tool = %name, elapsed_ms, "Tool call finished"),
            Err(e) => tracing::error!(tool = %name, error = %e.message, "Tool call failed"),
        }
        result
    }
}

// ─── Entry Point ─────────────────────────────────────────────────────────────

pub async fn run_mcp_server(layout: Layout, settings: Settings) -> Result<(), String> {
    tracing::info!(
        root = %layout.root().display(),
        anomaly_threshold_secs = settings.timestamp_anomaly_threshold,
        "Starting MCP server on stdio"
    );
    let server = McpServer {
        inner: Tools::new(layout, settings),
    };

    let service = server
        .serve(stdio())
        .await
        .map_err(|e| format!("MCP server error: {}", e))?;
    service
        .waiting()
        .await
        .map_err(|e| format!("MCP server terminated: {}", e))?;
    Ok(())
}
