//! HeartbeatId: a `YYYYMMDDHHMMSS` local-time stamp identifying one heartbeat cycle.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{HeartbeatError, Result};

const FORMAT: &str = "%Y%m%d%H%M%S";

fn id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{14}$").expect("static regex"))
}

/// Validated heartbeat identifier. Ordering is lexicographic, which is
/// also chronological.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HeartbeatId {
    raw: String,
    at: NaiveDateTime,
}

impl HeartbeatId {
    /// Parse and validate. Out-of-range components (month 13, day 32, hour 24)
    /// are rejected rather than rolled over.
    pub fn parse(raw: &str) -> Result<Self> {
        if !id_pattern().is_match(raw) {
            return Err(HeartbeatError::InvalidHeartbeatId(raw.to_string()));
        }
        let at = decode(raw).ok_or_else(|| HeartbeatError::InvalidCalendarDate { id: raw.to_string() })?;
        Ok(Self { raw: raw.to_string(), at })
    }

    /// True when `raw` has the 14-digit shape (calendar validity not checked).
    pub fn is_well_formed(raw: &str) -> bool {
        id_pattern().is_match(raw)
    }

    pub fn from_datetime(dt: &DateTime<Local>) -> Self {
        let naive = dt.naive_local();
        let at = naive.with_nanosecond(0).unwrap_or(naive);
        Self { raw: at.format(FORMAT).to_string(), at }
    }

    pub fn now() -> Self {
        Self::from_datetime(&Local::now())
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn to_naive(&self) -> NaiveDateTime {
        self.at
    }

    /// Resolve against the local timezone. Times skipped by a DST jump have
    /// no instant and are reported as invalid.
    pub fn to_local(&self) -> Result<DateTime<Local>> {
        Local
            .from_local_datetime(&self.to_naive())
            .earliest()
            .ok_or_else(|| HeartbeatError::InvalidCalendarDate { id: self.raw.clone() })
    }

    /// Seconds from this heartbeat to `now`. Negative when the id lies in the future.
    pub fn elapsed_since(&self, now: &DateTime<Local>) -> Result<i64> {
        Ok(now.signed_duration_since(self.to_local()?).num_seconds())
    }
}

fn decode(raw: &str) -> Option<NaiveDateTime> {
    let num = |range: std::ops::Range<usize>| raw.get(range)?.parse::<u32>().ok();
    let year = raw.get(0..4)?.parse::<i32>().ok()?;
    NaiveDate::from_ymd_opt(year, num(4..6)?, num(6..8)?)?.and_hms_opt(num(8..10)?, num(10..12)?, num(12..14)?)
}

impl fmt::Display for HeartbeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for HeartbeatId {
    type Error = HeartbeatError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<HeartbeatId> for String {
    fn from(id: HeartbeatId) -> Self {
        id.raw
    }
}

impl std::str::FromStr for HeartbeatId {
    type Err = HeartbeatError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_parse_valid() {
        let id = HeartbeatId::parse("20250115143000").unwrap();
        assert_eq!(id.as_str(), "20250115143000");
        let naive = id.to_naive();
        assert_eq!(naive.format("%Y-%m-%d %H:%M:%S").to_string(), "2025-01-15 14:30:00");
    }

    #[test]
    fn test_parse_rejects_bad_shape() {
        for raw in ["", "2025011514300", "202501151430000", "2025-01-15T14:3", "2025011514300a", " 20250115143000", "20250115143000\n"] {
            assert!(
                matches!(HeartbeatId::parse(raw), Err(HeartbeatError::InvalidHeartbeatId(_))),
                "should reject {raw:?}"
            );
        }
    }

    #[test]
    fn test_parse_rejects_impossible_dates() {
        for raw in ["20251301000000", "20250132000000", "20250230000000", "20250101240000", "20250101006000"] {
            assert!(
                matches!(HeartbeatId::parse(raw), Err(HeartbeatError::InvalidCalendarDate { .. })),
                "should reject {raw}"
            );
        }
        // Leap day is fine
        assert!(HeartbeatId::parse("20240229120000").is_ok());
    }

    #[test]
    fn test_round_trip_through_instant() {
        for raw in ["20250101000000", "20241231235959", "20250615093007"] {
            let id = HeartbeatId::parse(raw).unwrap();
            let Ok(at) = id.to_local() else { continue }; // DST gap in the test machine's zone
            assert_eq!(HeartbeatId::from_datetime(&at), id);
        }
    }

    #[test]
    fn test_elapsed_since_signed() {
        let id = HeartbeatId::parse("20250101120000").unwrap();
        let base = id.to_local().unwrap();
        assert_eq!(id.elapsed_since(&(base + Duration::seconds(125))).unwrap(), 125);
        assert_eq!(id.elapsed_since(&(base - Duration::minutes(10))).unwrap(), -600);
    }

    #[test]
    fn test_ordering_is_chronological() {
        let a = HeartbeatId::parse("20241231235959").unwrap();
        let b = HeartbeatId::parse("20250101000000").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_serde_validates() {
        let id: HeartbeatId = serde_json::from_str("\"20250101000000\"").unwrap();
        assert_eq!(id.as_str(), "20250101000000");
        assert!(serde_json::from_str::<HeartbeatId>("\"nope\"").is_err());
    }
}
