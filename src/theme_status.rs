//! Theme status reports and artifact listings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use ignore::WalkBuilder;
use serde::Serialize;

use crate::activity_log::{parse_histories, ActivityLogInfo};
use crate::error::{HeartbeatError, IoContext, Result};
use crate::heartbeat_id::HeartbeatId;
use crate::paths::{Layout, ThemeRef, HISTORIES_DIR};
use crate::session::SessionContext;

pub const DEFAULT_RECENT_ACTIVITY_COUNT: usize = 10;
pub const MIN_RECENT_ACTIVITY_COUNT: usize = 3;
pub const MAX_RECENT_ACTIVITY_COUNT: usize = 20;
const RECENT_ARTIFACTS: usize = 5;
/// Intervals with a coefficient of variation below this count as regular.
const REGULARITY_CV: f64 = 0.5;

// ─── Report types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeStatus {
    pub exists: bool,
    pub theme_directory: String,
    pub theme_start_id: String,
    #[serde(flatten)]
    pub details: Option<StatusDetails>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDetails {
    pub is_active: bool,
    pub theme_end_id: Option<String>,
    pub duration: ThemeDuration,
    pub activity: ActivityStats,
    pub artifacts: ArtifactStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeDuration {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub total_hours: i64,
    pub human_readable: String,
}

impl ThemeDuration {
    pub fn between(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        let total_minutes = (end - start).num_minutes().max(0);
        let total_hours = total_minutes / 60;
        let (days, hours, minutes) = (total_hours / 24, total_hours % 24, total_minutes % 60);

        let mut parts = Vec::new();
        if days > 0 {
            parts.push(format!("{}d", days));
        }
        if hours > 0 {
            parts.push(format!("{}h", hours));
        }
        if minutes > 0 {
            parts.push(format!("{}m", minutes));
        }
        let human_readable = if parts.is_empty() { "under 1 minute".to_string() } else { parts.join(" ") };

        Self { days, hours, minutes, total_hours, human_readable }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStats {
    pub total_count: usize,
    pub first_activity: Option<String>,
    pub last_activity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_distribution: Option<BTreeMap<String, TypeShare>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_pattern: Option<Vec<RecentActivity>>,
    pub frequency: Frequency,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeShare {
    pub count: usize,
    /// Rounded to a whole percent
    pub percentage: u32,
    pub last_occurrence: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentActivity {
    pub heartbeat_id: String,
    pub activity_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Frequency {
    /// Mean gap between consecutive activities, whole minutes
    pub average_interval: i64,
    pub is_regular: bool,
    /// Minutes from the last activity to now
    pub last_gap: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactStats {
    pub total_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_types: Option<BTreeMap<String, usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_artifacts: Option<Vec<RecentArtifact>>,
    pub artifacts_per_activity: f64,
    pub most_productive_activity_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentArtifact {
    pub filename: String,
    pub heartbeat_id: String,
}

#[derive(Debug, Clone, Copy)]
pub struct StatusOptions {
    pub include_detailed_stats: bool,
    pub recent_activity_count: usize,
}

impl Default for StatusOptions {
    fn default() -> Self {
        Self { include_detailed_stats: true, recent_activity_count: DEFAULT_RECENT_ACTIVITY_COUNT }
    }
}

impl StatusOptions {
    pub fn validate(&self) -> Result<()> {
        if !(MIN_RECENT_ACTIVITY_COUNT..=MAX_RECENT_ACTIVITY_COUNT).contains(&self.recent_activity_count) {
            return Err(HeartbeatError::InvalidInput(format!(
                "recentActivityCount must be between {} and {}",
                MIN_RECENT_ACTIVITY_COUNT, MAX_RECENT_ACTIVITY_COUNT
            )));
        }
        Ok(())
    }
}

// ─── Completion lookup ───────────────────────────────────────────────────────

/// End-record id for the theme, if one names its start id.
pub fn find_theme_end(layout: &Layout, theme: &ThemeRef) -> Result<Option<HeartbeatId>> {
    let dir = layout.theme_histories();
    if !dir.exists() {
        return Ok(None);
    }
    let suffix = format!("_end_{}.md", theme.theme.part);
    let marker = format!("**THEME_START_ID**: {}", theme.theme.start_id);

    let mut names = Vec::new();
    for entry in std::fs::read_dir(&dir).at("Failed to read", &dir)? {
        let entry = entry.at("Failed to read", &dir)?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(id) = name.strip_suffix(&suffix) {
                if HeartbeatId::is_well_formed(id) {
                    names.push((id.to_string(), entry.path()));
                }
            }
        }
    }
    names.sort();

    for (id, path) in names {
        let content = std::fs::read_to_string(&path).at("Failed to read", &path)?;
        if content.lines().any(|l| l.trim() == marker) {
            return HeartbeatId::parse(&id).map(Some);
        }
    }
    Ok(None)
}

// ─── Statistics ──────────────────────────────────────────────────────────────

/// `activities` must be newest first.
fn activity_stats(activities: &[ActivityLogInfo], now: NaiveDateTime, opts: StatusOptions) -> ActivityStats {
    let last = activities.first();
    let first = activities.last();

    let mut distribution: BTreeMap<String, TypeShare> = BTreeMap::new();
    for a in activities {
        let share = distribution.entry(a.activity_type.clone()).or_insert_with(|| TypeShare {
            count: 0,
            percentage: 0,
            last_occurrence: a.heartbeat_id.to_string(),
        });
        share.count += 1;
    }
    let total = activities.len();
    for share in distribution.values_mut() {
        share.percentage = ((share.count as f64 / total as f64) * 100.0).round() as u32;
    }

    let mut recent: Vec<RecentActivity> = activities
        .iter()
        .take(opts.recent_activity_count)
        .map(|a| RecentActivity {
            heartbeat_id: a.heartbeat_id.to_string(),
            activity_type: a.activity_type.clone(),
        })
        .collect();
    recent.reverse();

    let intervals: Vec<f64> = activities
        .windows(2)
        .map(|w| (w[0].heartbeat_id.to_naive() - w[1].heartbeat_id.to_naive()).num_seconds() as f64 / 60.0)
        .collect();
    let (average, is_regular) = interval_profile(&intervals);
    let last_gap = last.map_or(0, |a| (now - a.heartbeat_id.to_naive()).num_minutes());

    ActivityStats {
        total_count: total,
        first_activity: first.map(|a| a.heartbeat_id.to_string()),
        last_activity: last.map(|a| a.heartbeat_id.to_string()),
        type_distribution: opts.include_detailed_stats.then_some(distribution),
        recent_pattern: opts.include_detailed_stats.then_some(recent),
        frequency: Frequency { average_interval: average.round() as i64, is_regular, last_gap },
    }
}

/// Mean interval and whether the spread is small enough to call regular.
fn interval_profile(intervals: &[f64]) -> (f64, bool) {
    if intervals.is_empty() {
        return (0.0, false);
    }
    let n = intervals.len() as f64;
    let mean = intervals.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return (mean, false);
    }
    let variance = intervals.iter().map(|i| (i - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt() / mean < REGULARITY_CV)
}

fn extension_of(artifact: &str) -> String {
    Path::new(artifact)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_else(|| ".txt".to_string())
}

fn artifact_stats(activities: &[ActivityLogInfo], opts: StatusOptions) -> ArtifactStats {
    let mut file_types: BTreeMap<String, usize> = BTreeMap::new();
    let mut per_type: BTreeMap<&str, usize> = BTreeMap::new();
    let mut recent = Vec::new();
    let mut total = 0;

    for a in activities {
        *per_type.entry(a.activity_type.as_str()).or_default() += a.artifacts.len();
        for artifact in &a.artifacts {
            total += 1;
            *file_types.entry(extension_of(artifact)).or_default() += 1;
            if recent.len() < RECENT_ARTIFACTS {
                recent.push(RecentArtifact {
                    filename: artifact.clone(),
                    heartbeat_id: a.heartbeat_id.to_string(),
                });
            }
        }
    }

    // Ties go to the alphabetically first type
    let most_productive = per_type
        .iter()
        .filter(|(_, count)| **count > 0)
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .map(|(t, _)| t.to_string());
    let per_activity = if activities.is_empty() {
        0.0
    } else {
        (total as f64 / activities.len() as f64 * 100.0).round() / 100.0
    };

    ArtifactStats {
        total_count: total,
        file_types: opts.include_detailed_stats.then_some(file_types),
        recent_artifacts: opts.include_detailed_stats.then_some(recent),
        artifacts_per_activity: per_activity,
        most_productive_activity_type: most_productive,
    }
}

/// Status of one theme. A missing directory is reported with `exists: false`.
pub fn check_theme_status(ctx: &SessionContext, theme: &ThemeRef, opts: StatusOptions) -> Result<ThemeStatus> {
    opts.validate()?;
    let layout = &ctx.layout;
    let theme_dir = layout.theme_dir(theme);
    let mut status = ThemeStatus {
        exists: theme_dir.is_dir(),
        theme_directory: theme.relative_path().display().to_string(),
        theme_start_id: theme.theme.start_id.to_string(),
        details: None,
    };
    if !status.exists {
        return Ok(status);
    }

    let now = ctx.now.naive_local();
    let end = find_theme_end(layout, theme)?;
    let until = end.as_ref().map_or(now, |id| id.to_naive());
    let activities = parse_histories(&theme_dir.join(HISTORIES_DIR))?;

    status.details = Some(StatusDetails {
        is_active: end.is_none(),
        theme_end_id: end.map(|id| id.to_string()),
        duration: ThemeDuration::between(theme.theme.start_id.to_naive(), until),
        activity: activity_stats(&activities, now, opts),
        artifacts: artifact_stats(&activities, opts),
    });
    Ok(status)
}

// ─── Artifact listing ────────────────────────────────────────────────────────

fn is_listable(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    !(name.starts_with('.')
        || lower == "thumbs.db"
        || lower == "desktop.ini"
        || lower.ends_with(".tmp")
        || lower.ends_with(".temp")
        || name.ends_with('~'))
}

/// Files under the theme directory, sorted, relative to the working root.
/// `histories/` is not an artifact.
pub fn list_theme_artifacts(layout: &Layout, theme: &ThemeRef, include_subdirectories: bool) -> Result<Vec<PathBuf>> {
    let theme_dir = layout.theme_dir(theme);
    if !theme_dir.is_dir() {
        return Err(HeartbeatError::ThemeDirectoryMissing(theme.relative_path()));
    }
    let histories = theme_dir.join(HISTORIES_DIR);

    let mut builder = WalkBuilder::new(&theme_dir);
    builder
        .hidden(true)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .require_git(false)
        .filter_entry(move |e| e.path() != histories.as_path());
    if !include_subdirectories {
        builder.max_depth(Some(1));
    }

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let listable = entry.file_name().to_str().is_some_and(is_listable);
        if listable {
            let path = entry.path();
            files.push(path.strip_prefix(layout.root()).unwrap_or(path).to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity_log::{render_markdown, ActivityLogRequest, ActivityType};
    use crate::settings::Settings;
    use crate::utils::bullet_list;

    fn ctx_at(root: &Path, now: &str) -> SessionContext {
        let now = HeartbeatId::parse(now).unwrap().to_local().unwrap();
        SessionContext::new(Layout::new(root), Settings::default(), now)
    }

    fn theme() -> ThemeRef {
        ThemeRef::from_parts("20250101100000", "parser_study", None, None).unwrap()
    }

    fn seed_log(ctx: &SessionContext, id: &str, kind: ActivityType, artifacts: &[&str]) {
        let req = ActivityLogRequest {
            heartbeat_id: HeartbeatId::parse(id).unwrap(),
            theme: theme(),
            activity_type: kind,
            activity_content: vec!["work".into()],
            artifacts: artifacts.iter().map(|a| a.to_string()).collect(),
            evaluation: String::new(),
            auxiliary_operations: vec![],
        };
        let dir = ctx.layout.theme_dir(&theme()).join(HISTORIES_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{}.md", id)), render_markdown(&req)).unwrap();
    }

    fn write_end_record(ctx: &SessionContext, end_id: &str, start_id: &str) {
        let dir = ctx.layout.theme_histories();
        std::fs::create_dir_all(&dir).unwrap();
        let body = format!("# Theme End: x\n\n**THEME_START_ID**: {}\n**THEME_END_ID**: {}\n", start_id, end_id);
        std::fs::write(dir.join(format!("{}_end_parser_study.md", end_id)), body).unwrap();
    }

    #[test]
    fn test_duration_between() {
        let start = HeartbeatId::parse("20250101100000").unwrap().to_naive();
        let end = HeartbeatId::parse("20250102113000").unwrap().to_naive();
        let d = ThemeDuration::between(start, end);
        assert_eq!((d.days, d.hours, d.minutes, d.total_hours), (1, 1, 30, 25));
        assert_eq!(d.human_readable, "1d 1h 30m");
        assert_eq!(ThemeDuration::between(start, start).human_readable, "under 1 minute");
    }

    #[test]
    fn test_interval_profile() {
        assert_eq!(interval_profile(&[]), (0.0, false));
        assert_eq!(interval_profile(&[10.0, 10.0, 10.0]), (10.0, true));
        let (mean, regular) = interval_profile(&[1.0, 30.0]);
        assert!((mean - 15.5).abs() < 1e-9);
        assert!(!regular);
    }

    #[test]
    fn test_missing_theme() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ctx_at(tmp.path(), "20250101120000");
        let status = check_theme_status(&ctx, &theme(), StatusOptions::default()).unwrap();
        assert!(!status.exists);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["exists"], false);
        assert!(json.get("isActive").is_none());
    }

    #[test]
    fn test_active_theme_statistics() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ctx_at(tmp.path(), "20250101120000");
        seed_log(&ctx, "20250101101000", ActivityType::Thinking, &[]);
        seed_log(&ctx, "20250101102000", ActivityType::Creation, &["artifacts/20250101100000_parser_study/a.rs"]);
        seed_log(&ctx, "20250101103000", ActivityType::Creation, &["artifacts/x/b.md", "artifacts/x/notes"]);

        let status = check_theme_status(&ctx, &theme(), StatusOptions::default()).unwrap();
        let details = status.details.unwrap();
        assert!(details.is_active);
        assert_eq!(details.duration.total_hours, 2);

        let activity = details.activity;
        assert_eq!(activity.total_count, 3);
        assert_eq!(activity.first_activity.as_deref(), Some("20250101101000"));
        assert_eq!(activity.last_activity.as_deref(), Some("20250101103000"));
        let dist = activity.type_distribution.unwrap();
        assert_eq!(dist["creation"].count, 2);
        assert_eq!(dist["creation"].percentage, 67);
        assert_eq!(dist["creation"].last_occurrence, "20250101103000");
        let pattern: Vec<_> = activity.recent_pattern.unwrap().into_iter().map(|r| r.activity_type).collect();
        assert_eq!(pattern, vec!["thinking", "creation", "creation"]);
        assert_eq!(activity.frequency, Frequency { average_interval: 10, is_regular: true, last_gap: 90 });

        let artifacts = details.artifacts;
        assert_eq!(artifacts.total_count, 3);
        let types = artifacts.file_types.unwrap();
        assert_eq!(types[".rs"], 1);
        assert_eq!(types[".txt"], 1);
        assert_eq!(artifacts.artifacts_per_activity, 1.0);
        assert_eq!(artifacts.most_productive_activity_type.as_deref(), Some("creation"));
    }

    #[test]
    fn test_completed_theme_and_summary_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ctx_at(tmp.path(), "20250103000000");
        std::fs::create_dir_all(ctx.layout.theme_dir(&theme())).unwrap();
        // Same part, different theme
        write_end_record(&ctx, "20250101105000", "20241231000000");
        write_end_record(&ctx, "20250101110000", "20250101100000");

        let opts = StatusOptions { include_detailed_stats: false, ..Default::default() };
        let details = check_theme_status(&ctx, &theme(), opts).unwrap().details.unwrap();
        assert!(!details.is_active);
        assert_eq!(details.theme_end_id.as_deref(), Some("20250101110000"));
        assert_eq!(details.duration.human_readable, "1h");
        assert!(details.activity.type_distribution.is_none());
        assert!(details.artifacts.file_types.is_none());
        assert_eq!(details.activity.total_count, 0);
    }

    #[test]
    fn test_recent_activity_count_bounds() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ctx_at(tmp.path(), "20250101120000");
        let opts = StatusOptions { recent_activity_count: 2, ..Default::default() };
        assert!(matches!(check_theme_status(&ctx, &theme(), opts), Err(HeartbeatError::InvalidInput(_))));
    }

    #[test]
    fn test_list_theme_artifacts_filters() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        let dir = layout.theme_dir(&theme());
        std::fs::create_dir_all(dir.join("histories")).unwrap();
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        for name in [
            "histories/20250101101000.md",
            "b.md",
            "a.rs",
            ".hidden",
            "Thumbs.db",
            "draft.tmp",
            "notes.md~",
            "sub/deep.txt",
        ] {
            std::fs::write(dir.join(name), "x").unwrap();
        }

        let listed: Vec<String> = list_theme_artifacts(&layout, &theme(), true)
            .unwrap()
            .into_iter()
            .map(|p| p.display().to_string())
            .collect();
        assert_eq!(
            bullet_list(&listed),
            "- artifacts/20250101100000_parser_study/a.rs\n\
             - artifacts/20250101100000_parser_study/b.md\n\
             - artifacts/20250101100000_parser_study/sub/deep.txt"
        );

        let top = list_theme_artifacts(&layout, &theme(), false).unwrap();
        assert_eq!(top.len(), 2);
    }

    #[test]
    fn test_list_missing_theme() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        assert!(matches!(
            list_theme_artifacts(&layout, &theme(), true),
            Err(HeartbeatError::ThemeDirectoryMissing(_))
        ));
    }
}
