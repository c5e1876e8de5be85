//! Themebox and feedbackbox: directory-backed queues of markdown items.
//!
//! Items are `*.md` files taken in lexicographic order. `draft.` files are not
//! ready yet and `processed.` files are done; both are skipped. Processing
//! renames in place to `processed.{name}`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HeartbeatError, IoContext, Result};
use crate::paths::Layout;

pub const DRAFT_PREFIX: &str = "draft.";
pub const PROCESSED_PREFIX: &str = "processed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum InboxKind {
    Themebox,
    Feedbackbox,
}

impl InboxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Themebox => "themebox",
            Self::Feedbackbox => "feedbackbox",
        }
    }

    pub fn dir(&self, layout: &Layout) -> PathBuf {
        match self {
            Self::Themebox => layout.themebox(),
            Self::Feedbackbox => layout.feedbackbox(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InboxItem {
    pub filename: String,
    pub content: String,
    /// Eligible items left after this one
    pub remaining: usize,
}

fn is_eligible(name: &str) -> bool {
    name.ends_with(".md") && !name.starts_with(DRAFT_PREFIX) && !name.starts_with(PROCESSED_PREFIX)
}

/// Eligible filenames in `dir`, sorted. The directory must exist.
fn eligible_items(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).at("Failed to read", dir)? {
        let entry = entry.at("Failed to read", dir)?;
        if !entry.path().is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if is_eligible(name) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Read the next item without changing anything. A missing directory has no items.
pub fn preview_next(layout: &Layout, kind: InboxKind) -> Result<Option<InboxItem>> {
    let dir = kind.dir(layout);
    if !dir.exists() {
        return Ok(None);
    }
    let names = eligible_items(&dir)?;
    let Some(first) = names.first() else { return Ok(None) };
    let path = dir.join(first);
    let content = std::fs::read_to_string(&path).at("Failed to read", &path)?;
    Ok(Some(InboxItem {
        filename: first.clone(),
        content,
        remaining: names.len() - 1,
    }))
}

/// Outcome of `process_next`.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// The directory did not exist and was created
    Created,
    Empty,
    Processed(InboxItem),
}

/// Take the next item: read it, then rename it to `processed.{name}`.
pub fn process_next(layout: &Layout, kind: InboxKind) -> Result<ProcessOutcome> {
    let dir = kind.dir(layout);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).at("Failed to create", &dir)?;
        tracing::info!(inbox = kind.as_str(), "Created missing inbox directory");
        return Ok(ProcessOutcome::Created);
    }
    let names = eligible_items(&dir)?;
    let Some(first) = names.first() else { return Ok(ProcessOutcome::Empty) };

    let path = dir.join(first);
    let content = std::fs::read_to_string(&path).at("Failed to read", &path)?;
    mark_processed(&dir, first)?;
    tracing::info!(inbox = kind.as_str(), item = %first, "Processed inbox item");

    Ok(ProcessOutcome::Processed(InboxItem {
        filename: first.clone(),
        content,
        remaining: names.len() - 1,
    }))
}

/// Check that `name` is a pending item in `dir`.
pub fn ensure_pending(dir: &Path, name: &str) -> Result<PathBuf> {
    if name.starts_with(PROCESSED_PREFIX) {
        return Err(HeartbeatError::InboxItemProcessed(name.to_string()));
    }
    let path = dir.join(name);
    if !path.is_file() {
        return Err(HeartbeatError::InboxItemMissing(path));
    }
    Ok(path)
}

/// Rename `dir/name` to `dir/processed.name`.
pub fn mark_processed(dir: &Path, name: &str) -> Result<PathBuf> {
    let from = dir.join(name);
    let to = dir.join(format!("{}{}", PROCESSED_PREFIX, name));
    std::fs::rename(&from, &to).at("Failed to rename", &from)?;
    Ok(to)
}
