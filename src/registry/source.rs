// src/registry/source.rs
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ControlError;

pub type SourceId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub url: String,
    pub interval_minutes: u64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    /// Last pass that completed without a homepage error.
    pub last_success_at: Option<DateTime<Utc>>,
    /// Last pass, successful or not. Drives the due check.
    pub last_checked_at: Option<DateTime<Utc>>,
    /// High-water marker: key of the newest item ingested so far.
    pub last_seen_key: Option<String>,
    pub total_ingested: u64,
    pub last_error: Option<String>,
    pub error_count: u32,
}

impl Source {
    /// Out-of-range values (only reachable through a hand-edited snapshot)
    /// saturate instead of panicking.
    pub fn interval(&self) -> ChronoDuration {
        i64::try_from(self.interval_minutes)
            .ok()
            .and_then(ChronoDuration::try_minutes)
            .unwrap_or(ChronoDuration::MAX)
    }

    /// Never-checked sources are due immediately; disabled ones never are.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_checked_at {
            None => true,
            Some(ts) => now.signed_duration_since(ts) >= self.interval(),
        }
    }
}

/// Registration payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSource {
    pub name: String,
    pub url: String,
    #[serde(default = "default_interval")]
    pub interval_minutes: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_interval() -> u64 {
    5
}

fn default_enabled() -> bool {
    true
}

/// Partial update; `None` fields are left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub interval_minutes: Option<u64>,
    pub enabled: Option<bool>,
}

/// Accept only absolute http(s) URLs with a host. Returns the normalized form.
pub fn validate_url(raw: &str) -> Result<String, ControlError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ControlError::InvalidSource("url is required".into()));
    }
    let parsed = Url::parse(trimmed)
        .map_err(|e| ControlError::InvalidSource(format!("url {trimmed:?}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ControlError::InvalidSource(format!(
            "url scheme must be http or https, got {}",
            parsed.scheme()
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ControlError::InvalidSource("url has no host".into()));
    }
    Ok(parsed.to_string())
}

pub(crate) fn validate_name(raw: &str) -> Result<String, ControlError> {
    let t = raw.trim();
    if t.is_empty() {
        return Err(ControlError::InvalidSource("name is required".into()));
    }
    Ok(t.to_string())
}

/// One week.
pub const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

pub(crate) fn validate_interval(minutes: u64) -> Result<u64, ControlError> {
    if minutes == 0 {
        return Err(ControlError::InvalidSource(
            "interval_minutes must be at least 1".into(),
        ));
    }
    if minutes > MAX_INTERVAL_MINUTES {
        return Err(ControlError::InvalidSource(format!(
            "interval_minutes must be at most {MAX_INTERVAL_MINUTES}"
        )));
    }
    Ok(minutes)
}
