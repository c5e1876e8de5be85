//! Path resolution for the heartbeat working tree.
//!
//! Everything here is pure: no function touches the filesystem. Directory
//! creation is left to the callers.
//!
//! ```text
//! artifacts/{START_ID}_{part}/histories/{heartbeatId}[_NN].md
//! artifacts/{START_ID}_{part}/contexts/{heartbeatId}.md
//! artifacts/{START_ID}_{part}/subthemes/{childStartId}_{childPart}/...
//! artifacts/theme_histories/{id}_{start|end}_{part}.md
//! stats/{checkpoints,deep_work,cooldown,lock}/
//! stats/current_heartbeat_id.txt
//! themebox/*.md, feedbackbox/*.md
//! heartbeat.conf
//! ```

use std::path::{Path, PathBuf};

use crate::error::{HeartbeatError, Result};
use crate::heartbeat_id::HeartbeatId;

pub const ARTIFACTS_DIR: &str = "artifacts";
pub const THEME_HISTORIES_DIR: &str = "theme_histories";
pub const STATS_DIR: &str = "stats";
pub const THEMEBOX_DIR: &str = "themebox";
pub const FEEDBACKBOX_DIR: &str = "feedbackbox";
pub const HISTORIES_DIR: &str = "histories";
pub const CONTEXTS_DIR: &str = "contexts";
pub const SUBTHEMES_DIR: &str = "subthemes";
pub const LEGACY_CONTEXT_FILE: &str = "context.md";
pub const CONFIG_FILE: &str = "heartbeat.conf";

// ─── Sanitization ────────────────────────────────────────────────────────────

/// Last path segment of a user-supplied name (`a/b/` → `b`).
pub fn base_name(raw: &str) -> &str {
    let trimmed = raw.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Normalise a directory part to `[a-z0-9_]*`.
///
/// Lowercases, replaces every run of other characters with a single `_` and
/// collapses repeated underscores. Idempotent. May return an empty string.
pub fn sanitize_directory_part(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in base_name(raw).chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '_' };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    out
}

/// True when a sanitized part carries no usable name (empty or only underscores).
pub fn is_degenerate_part(sanitized: &str) -> bool {
    sanitized.chars().all(|c| c == '_')
}

// ─── Theme references ────────────────────────────────────────────────────────

/// One theme directory segment: `{start_id}_{part}` with `part` sanitized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeDir {
    pub start_id: HeartbeatId,
    pub part: String,
}

impl ThemeDir {
    pub fn new(start_id: HeartbeatId, raw_part: &str) -> Self {
        Self {
            start_id,
            part: sanitize_directory_part(raw_part),
        }
    }

    pub fn dir_name(&self) -> String {
        format!("{}_{}", self.start_id, self.part)
    }
}

/// A theme, optionally nested one level under a parent theme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeRef {
    pub theme: ThemeDir,
    pub parent: Option<ThemeDir>,
}

impl ThemeRef {
    pub fn top_level(theme: ThemeDir) -> Self {
        Self { theme, parent: None }
    }

    pub fn subtheme(theme: ThemeDir, parent: ThemeDir) -> Self {
        Self { theme, parent: Some(parent) }
    }

    /// Build from raw tool arguments. A parent start id and a parent
    /// directory part must be given together.
    pub fn from_parts(
        start_id: &str,
        part: &str,
        parent_start_id: Option<&str>,
        parent_part: Option<&str>,
    ) -> Result<Self> {
        let theme = ThemeDir::new(HeartbeatId::parse(start_id)?, part);
        let parent = parent_parts(parent_start_id, parent_part)?.map(|(id, p)| ThemeDir::new(id, p));
        Ok(Self { theme, parent })
    }

    pub fn is_subtheme(&self) -> bool {
        self.parent.is_some()
    }

    /// Path relative to the working root.
    pub fn relative_path(&self) -> PathBuf {
        match &self.parent {
            Some(parent) => Path::new(ARTIFACTS_DIR)
                .join(parent.dir_name())
                .join(SUBTHEMES_DIR)
                .join(self.theme.dir_name()),
            None => Path::new(ARTIFACTS_DIR).join(self.theme.dir_name()),
        }
    }

    pub fn parent_relative_path(&self) -> Option<PathBuf> {
        self.parent
            .as_ref()
            .map(|p| Path::new(ARTIFACTS_DIR).join(p.dir_name()))
    }

    pub fn histories_path(&self) -> PathBuf {
        self.relative_path().join(HISTORIES_DIR)
    }

    pub fn contexts_path(&self) -> PathBuf {
        self.relative_path().join(CONTEXTS_DIR)
    }

    pub fn legacy_context_path(&self) -> PathBuf {
        self.relative_path().join(LEGACY_CONTEXT_FILE)
    }

    /// "Theme" or "Subtheme", for messages.
    pub fn kind(&self) -> &'static str {
        if self.is_subtheme() { "Subtheme" } else { "Theme" }
    }
}

/// Validate an optional parent reference given as two tool arguments. Both or
/// neither must be present.
pub fn parent_parts<'a>(
    parent_start_id: Option<&str>,
    parent_part: Option<&'a str>,
) -> Result<Option<(HeartbeatId, &'a str)>> {
    match (parent_start_id, parent_part) {
        (Some(pid), Some(ppart)) => Ok(Some((HeartbeatId::parse(pid)?, ppart))),
        (Some(_), None) => Err(HeartbeatError::MissingCompanion {
            given: "parentThemeStartId",
            missing: "parentThemeDirectoryPart",
        }),
        (None, Some(_)) => Err(HeartbeatError::MissingCompanion {
            given: "parentThemeDirectoryPart",
            missing: "parentThemeStartId",
        }),
        (None, None) => Ok(None),
    }
}

/// Warning for a response when sanitizing changed a user-supplied name.
pub fn sanitize_notice(label: &str, raw: &str, sanitized: &str) -> Option<String> {
    (raw != sanitized).then(|| format!("Warning: {} changed from '{}' to '{}'", label, raw, sanitized))
}

/// String-level resolver: sanitizes both parts and returns the theme path
/// relative to the working root. The parent is used only when both of its
/// fields are present.
pub fn resolve_theme_path(
    start_id: &str,
    part: &str,
    parent_start_id: Option<&str>,
    parent_part: Option<&str>,
) -> PathBuf {
    let child = format!("{}_{}", start_id, sanitize_directory_part(part));
    match (parent_start_id, parent_part) {
        (Some(pid), Some(ppart)) => Path::new(ARTIFACTS_DIR)
            .join(format!("{}_{}", pid, sanitize_directory_part(ppart)))
            .join(SUBTHEMES_DIR)
            .join(child),
        _ => Path::new(ARTIFACTS_DIR).join(child),
    }
}

// ─── Layout ──────────────────────────────────────────────────────────────────

/// Absolute locations inside one working root.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    /// Strip the root for display. Paths outside the root are returned as-is.
    pub fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .display()
            .to_string()
    }

    pub fn artifacts(&self) -> PathBuf {
        self.root.join(ARTIFACTS_DIR)
    }

    pub fn theme_histories(&self) -> PathBuf {
        self.artifacts().join(THEME_HISTORIES_DIR)
    }

    pub fn theme_dir(&self, theme: &ThemeRef) -> PathBuf {
        self.root.join(theme.relative_path())
    }

    pub fn stats(&self) -> PathBuf {
        self.root.join(STATS_DIR)
    }

    pub fn checkpoints(&self) -> PathBuf {
        self.stats().join("checkpoints")
    }

    pub fn deep_work(&self) -> PathBuf {
        self.stats().join("deep_work")
    }

    pub fn cooldown(&self) -> PathBuf {
        self.stats().join("cooldown")
    }

    pub fn lock(&self) -> PathBuf {
        self.stats().join("lock")
    }

    pub fn current_heartbeat_file(&self) -> PathBuf {
        self.stats().join("current_heartbeat_id.txt")
    }

    pub fn themebox(&self) -> PathBuf {
        self.root.join(THEMEBOX_DIR)
    }

    pub fn feedbackbox(&self) -> PathBuf {
        self.root.join(FEEDBACKBOX_DIR)
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> HeartbeatId {
        HeartbeatId::parse(raw).unwrap()
    }

    #[test]
    fn test_sanitize_examples() {
        assert_eq!(sanitize_directory_part("My Theme!"), "my_theme_");
        assert_eq!(sanitize_directory_part("Parent Dir"), "parent_dir");
        assert_eq!(sanitize_directory_part("ai_research"), "ai_research");
        assert_eq!(sanitize_directory_part("a--b__c"), "a_b_c");
        assert_eq!(sanitize_directory_part("日本語テーマ"), "_");
        assert_eq!(sanitize_directory_part(""), "");
    }

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_directory_part("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_directory_part("nested/Theme/"), "theme");
    }

    #[test]
    fn test_sanitize_idempotent_and_charset() {
        let samples = [
            "My Theme!", "  spaced  out ", "UPPER_case-42", "emoji 🚀 launch", "__x__", "a/b/c", "Ünïcödé",
            "..", "tab\tand\nnewline",
        ];
        for s in samples {
            let once = sanitize_directory_part(s);
            assert_eq!(sanitize_directory_part(&once), once, "not idempotent for {s:?}");
            assert!(
                once.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'),
                "bad charset in {once:?}"
            );
            assert!(!once.contains("__"), "repeated underscore in {once:?}");
        }
    }

    #[test]
    fn test_degenerate_part() {
        assert!(is_degenerate_part(""));
        assert!(is_degenerate_part("_"));
        assert!(!is_degenerate_part("my_theme_"));
    }

    #[test]
    fn test_resolve_subtheme_path() {
        let path = resolve_theme_path("20250101000000", "My Theme!", Some("20241231000000"), Some("Parent Dir"));
        assert_eq!(
            path,
            PathBuf::from("artifacts/20241231000000_parent_dir/subthemes/20250101000000_my_theme_")
        );
    }

    #[test]
    fn test_resolve_top_level_path() {
        let path = resolve_theme_path("20250101000000", "AI Research", None, None);
        assert_eq!(path, PathBuf::from("artifacts/20250101000000_ai_research"));
        // A lone parent field is ignored by the string-level resolver
        let path = resolve_theme_path("20250101000000", "x", Some("20241231000000"), None);
        assert_eq!(path, PathBuf::from("artifacts/20250101000000_x"));
    }

    #[test]
    fn test_theme_ref_matches_string_resolver() {
        let theme = ThemeRef::from_parts("20250101000000", "My Theme!", Some("20241231000000"), Some("Parent Dir")).unwrap();
        assert_eq!(
            theme.relative_path(),
            resolve_theme_path("20250101000000", "My Theme!", Some("20241231000000"), Some("Parent Dir"))
        );
        assert_eq!(theme.histories_path(), theme.relative_path().join("histories"));
        assert_eq!(theme.contexts_path(), theme.relative_path().join("contexts"));
        assert_eq!(theme.legacy_context_path(), theme.relative_path().join("context.md"));
        assert_eq!(theme.parent_relative_path(), Some(PathBuf::from("artifacts/20241231000000_parent_dir")));
    }

    #[test]
    fn test_theme_ref_requires_both_parent_fields() {
        let err = ThemeRef::from_parts("20250101000000", "x", Some("20241231000000"), None).unwrap_err();
        assert!(matches!(err, HeartbeatError::MissingCompanion { missing: "parentThemeDirectoryPart", .. }));
        let err = ThemeRef::from_parts("20250101000000", "x", None, Some("parent")).unwrap_err();
        assert!(matches!(err, HeartbeatError::MissingCompanion { missing: "parentThemeStartId", .. }));
    }

    #[test]
    fn test_sanitize_notice() {
        assert!(sanitize_notice("directory name", "ai_research", "ai_research").is_none());
        let notice = sanitize_notice("directory name", "AI Research", "ai_research").unwrap();
        assert!(notice.contains("'AI Research'") && notice.contains("'ai_research'"));
    }

    #[test]
    fn test_layout_locations() {
        let layout = Layout::new("/work");
        let theme = ThemeRef::top_level(ThemeDir::new(id("20250101000000"), "demo"));
        assert_eq!(layout.theme_dir(&theme), PathBuf::from("/work/artifacts/20250101000000_demo"));
        assert_eq!(layout.theme_histories(), PathBuf::from("/work/artifacts/theme_histories"));
        assert_eq!(layout.deep_work(), PathBuf::from("/work/stats/deep_work"));
        assert_eq!(layout.current_heartbeat_file(), PathBuf::from("/work/stats/current_heartbeat_id.txt"));
        assert_eq!(layout.display_path(&layout.theme_dir(&theme)), "artifacts/20250101000000_demo");
    }
}
