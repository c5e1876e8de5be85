//! Sequence allocation for heartbeat-keyed activity logs.
//!
//! A heartbeat normally produces one `histories/{id}.md`. Further logs for the
//! same heartbeat get `_01` … `_99` suffixes so every entry stays addressable
//! and sorts by `(id, seq)`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{HeartbeatError, Result};
use crate::heartbeat_id::HeartbeatId;

pub const MAX_SEQUENCE: u8 = 99;

fn log_filename_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{14})(?:_(\d{2}))?\.md$").expect("static regex"))
}

/// `{id}.md` or `{id}_NN.md`.
pub fn activity_log_filename(id: &HeartbeatId, sequence: Option<u8>) -> String {
    match sequence {
        Some(seq) => format!("{}_{:02}.md", id, seq),
        None => format!("{}.md", id),
    }
}

pub fn activity_log_path(histories_dir: &Path, id: &HeartbeatId, sequence: Option<u8>) -> PathBuf {
    histories_dir.join(activity_log_filename(id, sequence))
}

/// Split an activity-log filename into its heartbeat id and optional
/// sequence. Returns `None` for anything that isn't an activity log.
pub fn parse_log_filename(name: &str) -> Option<(String, Option<u8>)> {
    let caps = log_filename_pattern().captures(name)?;
    let id = caps.get(1)?.as_str().to_string();
    let seq = match caps.get(2) {
        Some(m) => Some(m.as_str().parse::<u8>().ok()?),
        None => None,
    };
    Some((id, seq))
}

/// First free slot for `id` inside `histories_dir`.
///
/// `Ok(None)` means the unsuffixed file is free. Otherwise the first missing
/// `_NN` is returned. Check-then-act: the caller writes afterwards without a
/// lock.
pub fn find_available_sequence(histories_dir: &Path, id: &HeartbeatId) -> Result<Option<u8>> {
    if !activity_log_path(histories_dir, id, None).exists() {
        return Ok(None);
    }
    (1..=MAX_SEQUENCE)
        .find(|seq| !activity_log_path(histories_dir, id, Some(*seq)).exists())
        .map(Some)
        .ok_or_else(|| HeartbeatError::SequenceExhausted(id.to_string()))
}

/// Warning appended to the response when a suffix had to be used.
pub fn sequence_warning(id: &HeartbeatId, sequence: u8) -> String {
    format!(
        "An activity log for heartbeat ID {} already exists, so sequence {:02} was assigned. \
         This usually means work continued after the log was written.",
        id, sequence
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> HeartbeatId {
        HeartbeatId::parse("20250101120000").unwrap()
    }

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), "x").unwrap();
    }

    #[test]
    fn test_unsuffixed_when_free() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(find_available_sequence(tmp.path(), &id()).unwrap(), None);
        // Missing directory behaves like an empty one
        assert_eq!(find_available_sequence(&tmp.path().join("nope"), &id()).unwrap(), None);
    }

    #[test]
    fn test_first_suffix_after_base() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "20250101120000.md");
        assert_eq!(find_available_sequence(tmp.path(), &id()).unwrap(), Some(1));
    }

    #[test]
    fn test_skips_taken_suffixes() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "20250101120000.md");
        for seq in 1..=5 {
            touch(tmp.path(), &format!("20250101120000_{:02}.md", seq));
        }
        assert_eq!(find_available_sequence(tmp.path(), &id()).unwrap(), Some(6));
    }

    #[test]
    fn test_exhausted() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "20250101120000.md");
        for seq in 1..=99 {
            touch(tmp.path(), &format!("20250101120000_{:02}.md", seq));
        }
        let err = find_available_sequence(tmp.path(), &id()).unwrap_err();
        assert!(matches!(err, HeartbeatError::SequenceExhausted(ref s) if s == "20250101120000"));
    }

    #[test]
    fn test_other_ids_do_not_interfere() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "20250101115959.md");
        assert_eq!(find_available_sequence(tmp.path(), &id()).unwrap(), None);
    }

    #[test]
    fn test_parse_log_filename() {
        assert_eq!(parse_log_filename("20250101120000.md"), Some(("20250101120000".into(), None)));
        assert_eq!(parse_log_filename("20250101120000_07.md"), Some(("20250101120000".into(), Some(7))));
        assert_eq!(parse_log_filename("20250101120000_7.md"), None);
        assert_eq!(parse_log_filename("notes.md"), None);
        assert_eq!(parse_log_filename("20250101120000.md.tmp"), None);
    }
}
