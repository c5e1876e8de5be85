//! Heartbeat settings
//!
//! Read from `heartbeat.conf`, the KEY=VALUE file shared with the heartbeat
//! shell scripts. Only the keys the tools act on are typed; everything else is
//! kept verbatim so callers can still inspect it.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Key for the time-deviation threshold, in seconds.
pub const TIMESTAMP_ANOMALY_THRESHOLD_KEY: &str = "TIMESTAMP_ANOMALY_THRESHOLD";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Deviation between a heartbeat ID and the wall clock that counts as an anomaly (default: 900s)
    #[serde(default = "default_anomaly_threshold")]
    pub timestamp_anomaly_threshold: u64,
    /// Every key found in the file, including the typed ones
    #[serde(default)]
    pub raw: BTreeMap<String, String>,
}

fn default_anomaly_threshold() -> u64 {
    900 // 15 minutes
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timestamp_anomaly_threshold: default_anomaly_threshold(),
            raw: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from disk, falling back to defaults when the file is
    /// missing. Lines dotenvy cannot parse are logged and skipped.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No heartbeat.conf, using defaults");
            return Self::default();
        }

        let iter = match dotenvy::from_path_iter(path) {
            Ok(iter) => iter,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to open heartbeat.conf, using defaults");
                return Self::default();
            }
        };

        let mut pairs = Vec::new();
        for item in iter {
            match item {
                Ok(pair) => pairs.push(pair),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping malformed config line"),
            }
        }
        Self::from_pairs(pairs)
    }

    /// Build settings from parsed KEY=VALUE pairs. Later keys win.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let raw: BTreeMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let mut settings = Settings { raw, ..Settings::default() };
        if let Some(value) = settings.raw.get(TIMESTAMP_ANOMALY_THRESHOLD_KEY) {
            match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => settings.timestamp_anomaly_threshold = secs,
                _ => tracing::warn!(
                    value = %value,
                    "Invalid {}, keeping default of {}s",
                    TIMESTAMP_ANOMALY_THRESHOLD_KEY,
                    settings.timestamp_anomaly_threshold
                ),
            }
        }
        settings
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.raw.get(key).map(String::as_str)
    }
}
