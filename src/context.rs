//! Theme expert contexts: `contexts/{heartbeatId}.md`, newest wins, with the
//! single `context.md` of older themes as a fallback.

use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{HeartbeatError, IoContext, Result};
use crate::heartbeat_id::HeartbeatId;
use crate::paths::{Layout, ThemeRef};
use crate::utils::bullet_list;

fn context_file_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{14})\.md$").expect("static regex"))
}

#[derive(Debug, Clone)]
pub struct ExpertContext {
    pub theme_name: String,
    pub expert_role: String,
    pub expert_perspective: Vec<String>,
    pub constraints: Vec<String>,
    pub expected_outcome: Vec<String>,
}

impl ExpertContext {
    pub fn render(&self) -> String {
        format!(
            "# Theme Expert Context: {}\n\n\
             ## Expert Role\n{}\n\n\
             ## Expert Perspective\n{}\n\n\
             ## Constraints\n{}\n\n\
             ## Expected Outcome\n{}\n",
            self.theme_name,
            self.expert_role,
            bullet_list(&self.expert_perspective),
            bullet_list(&self.constraints),
            bullet_list(&self.expected_outcome),
        )
    }
}

/// Write `contexts/{heartbeat_id}.md` under an existing theme. Overwrites a
/// context written earlier in the same heartbeat.
pub fn create_expert_context(
    layout: &Layout,
    theme: &ThemeRef,
    heartbeat_id: &HeartbeatId,
    context: &ExpertContext,
) -> Result<PathBuf> {
    let theme_dir = layout.theme_dir(theme);
    if !theme_dir.is_dir() {
        return Err(HeartbeatError::ThemeDirectoryMissing(theme.relative_path()));
    }
    let dir = layout.join(theme.contexts_path());
    std::fs::create_dir_all(&dir).at("Failed to create", &dir)?;
    let path = dir.join(format!("{}.md", heartbeat_id));
    std::fs::write(&path, context.render()).at("Failed to write", &path)?;
    tracing::info!(theme = %theme.relative_path().display(), heartbeat_id = %heartbeat_id, "Expert context written");
    Ok(path)
}

#[derive(Debug, Clone)]
pub struct LatestContext {
    pub path: PathBuf,
    pub content: String,
    /// Read from `context.md` rather than `contexts/`
    pub legacy: bool,
}

/// Newest `contexts/{id}.md`, else the legacy `context.md`, else `None`.
pub fn latest_theme_context(layout: &Layout, theme: &ThemeRef) -> Result<Option<LatestContext>> {
    let theme_dir = layout.theme_dir(theme);
    if !theme_dir.is_dir() {
        return Err(HeartbeatError::ThemeDirectoryMissing(theme.relative_path()));
    }

    let contexts = layout.join(theme.contexts_path());
    if contexts.is_dir() {
        let mut newest: Option<String> = None;
        for entry in std::fs::read_dir(&contexts).at("Failed to read", &contexts)? {
            let entry = entry.at("Failed to read", &contexts)?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !context_file_pattern().is_match(name) {
                continue;
            }
            if newest.as_deref().map_or(true, |cur| name > cur) {
                newest = Some(name.to_string());
            }
        }
        if let Some(name) = newest {
            let path = contexts.join(name);
            let content = std::fs::read_to_string(&path).at("Failed to read", &path)?;
            return Ok(Some(LatestContext { path, content, legacy: false }));
        }
    }

    let legacy = layout.join(theme.legacy_context_path());
    if legacy.is_file() {
        let content = std::fs::read_to_string(&legacy).at("Failed to read", &legacy)?;
        return Ok(Some(LatestContext { path: legacy, content, legacy: true }));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ExpertContext {
        ExpertContext {
            theme_name: "Parser Study".into(),
            expert_role: "Compiler engineer".into(),
            expert_perspective: vec!["Grammar first".into()],
            constraints: vec!["No generators".into(), "Stay small".into()],
            expected_outcome: vec!["A working parser".into()],
        }
    }

    fn theme_in(root: &std::path::Path) -> (Layout, ThemeRef) {
        let layout = Layout::new(root);
        let theme = ThemeRef::from_parts("20250101100000", "parser_study", None, None).unwrap();
        std::fs::create_dir_all(layout.theme_dir(&theme)).unwrap();
        (layout, theme)
    }

    #[test]
    fn test_render_sections() {
        let text = sample().render();
        assert!(text.starts_with("# Theme Expert Context: Parser Study"));
        assert!(text.contains("## Expert Role\nCompiler engineer"));
        assert!(text.contains("## Constraints\n- No generators\n- Stay small"));
    }

    #[test]
    fn test_create_requires_theme() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        let theme = ThemeRef::from_parts("20250101100000", "missing", None, None).unwrap();
        let id = HeartbeatId::parse("20250101110000").unwrap();
        assert!(matches!(
            create_expert_context(&layout, &theme, &id, &sample()),
            Err(HeartbeatError::ThemeDirectoryMissing(_))
        ));
    }

    #[test]
    fn test_latest_prefers_newest_then_legacy() {
        let tmp = tempfile::tempdir().unwrap();
        let (layout, theme) = theme_in(tmp.path());
        assert!(latest_theme_context(&layout, &theme).unwrap().is_none());

        let legacy = layout.join(theme.legacy_context_path());
        std::fs::write(&legacy, "old context").unwrap();
        let found = latest_theme_context(&layout, &theme).unwrap().unwrap();
        assert!(found.legacy);
        assert_eq!(found.content, "old context");

        for id in ["20250101110000", "20250101120000"] {
            let id = HeartbeatId::parse(id).unwrap();
            create_expert_context(&layout, &theme, &id, &sample()).unwrap();
        }
        std::fs::write(layout.join(theme.contexts_path()).join("notes.md"), "ignored").unwrap();

        let found = latest_theme_context(&layout, &theme).unwrap().unwrap();
        assert!(!found.legacy);
        assert!(found.path.ends_with("contexts/20250101120000.md"));
    }
}
