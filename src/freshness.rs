//! Staleness detection for displayed dashboard data.
//!
//! Two independent signals, because they catch different failure classes:
//! the age of the externally reported `lastUpdated` stamp (collector or
//! delivery path stalled), and the age of the newest entry actually loaded
//! (metadata refreshed but the data document was not — the two are written
//! by different paths and can desynchronize).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Qualitative staleness of the metadata signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreshnessState {
    Fresh,
    Aging,
    Stale,
    Unknown,
}

impl std::fmt::Display for FreshnessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FreshnessState::Fresh => write!(f, "fresh"),
            FreshnessState::Aging => write!(f, "aging"),
            FreshnessState::Stale => write!(f, "stale"),
            FreshnessState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Metadata younger than this is fresh.
const FRESH_LIMIT_MINS: i64 = 5;
/// Metadata older than this is stale.
const STALE_LIMIT_MINS: i64 = 60;
/// If no loaded entry is younger than this, the data itself is suspect.
const CONTENT_STALE_HOURS: i64 = 12;

/// Classify the metadata-age signal.
pub fn classify_metadata_age(
    last_updated: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> FreshnessState {
    let Some(ts) = last_updated else {
        return FreshnessState::Unknown;
    };
    let age = now - ts;
    if age < Duration::minutes(FRESH_LIMIT_MINS) {
        FreshnessState::Fresh
    } else if age <= Duration::minutes(STALE_LIMIT_MINS) {
        FreshnessState::Aging
    } else {
        FreshnessState::Stale
    }
}

/// Content-age signal: true when no entry is less than 12 hours old.
///
/// An empty data set is not evidence of staleness — load failures are
/// reported through the fetch path, not here.
pub fn content_is_stale(newest_entry: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match newest_entry {
        Some(ts) => now - ts >= Duration::hours(CONTENT_STALE_HOURS),
        None => false,
    }
}

/// Combined verdict over both signals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FreshnessReport {
    pub metadata: FreshnessState,
    #[serde(rename = "contentStale")]
    pub content_stale: bool,
    #[serde(rename = "evaluatedAt")]
    pub evaluated_at: DateTime<Utc>,
}

impl FreshnessReport {
    /// Stale metadata warrants an unconditional refresh attempt when
    /// auto-refresh is enabled, regardless of the configured interval.
    pub fn needs_refresh(&self) -> bool {
        self.metadata == FreshnessState::Stale
    }

    /// Whether the user should see the dismissible staleness warning.
    pub fn should_warn(&self) -> bool {
        self.metadata == FreshnessState::Stale || self.content_stale
    }
}

/// Evaluate both signals against the caller's `now`.
pub fn evaluate(
    last_updated: Option<DateTime<Utc>>,
    newest_entry: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> FreshnessReport {
    FreshnessReport {
        metadata: classify_metadata_age(last_updated, now),
        content_stale: content_is_stale(newest_entry, now),
        evaluated_at: now,
    }
}
