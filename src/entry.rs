//! Activity entry data model and the ingestion-boundary validator.
//!
//! Producers (cron jobs, session hooks, the CLI) hand loosely shaped JSON
//! to the tracker; [`EntryValidator`] assigns identity and timestamp
//! defaults so every entry past the boundary has a stable shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Agents the dashboard knows how to render. Unknown values are passed
/// through untouched — the set is advisory, not an allow-list.
pub const KNOWN_AGENTS: &[&str] = &["nox", "aria", "main"];

/// A single recorded unit of agent activity.
///
/// Immutable once accepted by the store; `id` is the only stable external
/// handle to an entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// Unique identifier (`"<source-prefix>-<epoch-ms>"` when store-assigned)
    pub id: String,
    /// When the activity occurred (UTC)
    pub timestamp: DateTime<Utc>,
    /// Which agent performed the activity
    pub agent: String,
    /// Free-form classification, used only for filtering and display
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable summary
    #[serde(default)]
    pub description: String,
    /// What the agent actually did
    #[serde(default)]
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Opaque producer-supplied payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(rename = "relatedIds", default, skip_serializing_if = "Option::is_none")]
    pub related_ids: Option<Vec<String>>,
}

impl ActivityEntry {
    /// Whether this agent identifier is one the dashboard renders natively.
    pub fn is_known_agent(&self) -> bool {
        KNOWN_AGENTS.contains(&self.agent.as_str())
    }
}

/// Incoming producer shape — everything optional, normalized at the boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
    #[serde(rename = "relatedIds", default)]
    pub related_ids: Option<Vec<String>>,
}

/// Assigns identity and timestamp defaults to incoming entries.
#[derive(Debug, Clone)]
pub struct EntryValidator {
    source_prefix: String,
}

impl EntryValidator {
    pub fn new(source_prefix: &str) -> Self {
        Self {
            source_prefix: source_prefix.to_string(),
        }
    }

    /// Normalize a producer payload into a well-formed entry.
    ///
    /// Missing `id` becomes `"<prefix>-<epoch-ms>"`, missing `timestamp`
    /// becomes `now`. Unknown agents pass through; missing text fields
    /// degrade to empty strings rather than being rejected.
    pub fn normalize(&self, new: NewEntry, now: DateTime<Utc>) -> ActivityEntry {
        let timestamp = new.timestamp.unwrap_or(now);
        let id = new
            .id
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("{}-{}", self.source_prefix, now.timestamp_millis()));

        ActivityEntry {
            id,
            timestamp,
            agent: new.agent.unwrap_or_else(|| "main".to_string()),
            kind: new.kind.unwrap_or_else(|| "note".to_string()),
            description: new.description.unwrap_or_default(),
            action: new.action.unwrap_or_default(),
            status: new.status,
            duration_ms: new.duration_ms,
            details: new.details,
            related_ids: new.related_ids,
        }
    }
}
