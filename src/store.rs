//! Append-only activity log store with deduplication and bounded retention.
//!
//! The store owns the durable sequence of entries. Writes are idempotent
//! inside a 5-minute window, growth is bounded by a 7-day retention sweep,
//! and every accepted mutation is persisted synchronously as a full snapshot
//! before the call returns (write-through, no write-behind buffering).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::entry::{ActivityEntry, EntryValidator, NewEntry};
use crate::error::TrackerError;
use crate::persist::JsonSnapshot;

/// Result of an append: duplicates are a normal outcome, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendOutcome {
    pub accepted: bool,
    /// Id of the stored entry — the pre-existing one when `accepted` is false.
    pub id: String,
}

/// Requested sort order for reads. Physical storage order is an
/// implementation artifact, never part of the read contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    TimestampAsc,
    #[default]
    TimestampDesc,
}

impl SortOrder {
    /// Parse the wire form: `"timestamp"` ascending, `"-timestamp"` descending.
    pub fn parse(s: &str) -> Self {
        match s {
            "timestamp" => SortOrder::TimestampAsc,
            _ => SortOrder::TimestampDesc,
        }
    }
}

/// Query parameters for filtered, sorted, paginated reads.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    /// Exact-match agent filter
    pub agent: Option<String>,
    /// Exact-match type filter
    pub kind: Option<String>,
    pub sort: SortOrder,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// One page of query results. `total` is the filtered set size before
/// pagination, not the store size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPage {
    pub entries: Vec<ActivityEntry>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// Aggregate statistics over the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityStats {
    pub total: usize,
    pub today: usize,
    #[serde(rename = "thisWeek")]
    pub this_week: usize,
    #[serde(rename = "byAgent")]
    pub by_agent: HashMap<String, usize>,
    #[serde(rename = "byType")]
    pub by_type: HashMap<String, usize>,
}

const DEFAULT_LIMIT: usize = 100;

/// The durable, deduplicated, retention-bounded entry sequence.
///
/// Internal state sits behind a mutex so append and sweep serialize even on
/// a parallel runtime; the write-through save happens inside the critical
/// section so no reader sees an entry that was never persisted.
pub struct ActivityStore {
    entries: Mutex<Vec<ActivityEntry>>,
    snapshot: JsonSnapshot,
    validator: EntryValidator,
    dedup_window: Duration,
    retention: Duration,
}

impl ActivityStore {
    /// Open the store, loading any existing snapshot from disk.
    pub fn open(
        snapshot: JsonSnapshot,
        source_prefix: &str,
        dedup_window_mins: i64,
        retention_days: i64,
    ) -> Self {
        let entries = snapshot.load();
        Self {
            entries: Mutex::new(entries),
            snapshot,
            validator: EntryValidator::new(source_prefix),
            dedup_window: Duration::minutes(dedup_window_mins),
            retention: Duration::days(retention_days),
        }
    }

    /// Append a producer entry. Duplicates fail softly (`accepted: false`);
    /// a persistence failure rolls back the in-memory insert and errs.
    pub fn append(&self, new: NewEntry) -> Result<AppendOutcome, TrackerError> {
        let entry = self.validator.normalize(new, Utc::now());

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        // Dedup is a window-bounded linear scan. The window filter is
        // explicit because producers can backfill out of order — physical
        // position says nothing about temporal proximity.
        if let Some(existing) = entries.iter().find(|e| {
            e.agent == entry.agent
                && e.kind == entry.kind
                && e.description == entry.description
                && (e.timestamp - entry.timestamp).abs() <= self.dedup_window
        }) {
            info!(id = %existing.id, agent = %entry.agent, "duplicate entry dropped");
            return Ok(AppendOutcome {
                accepted: false,
                id: existing.id.clone(),
            });
        }

        // Newest physically first; reads re-sort by timestamp regardless.
        let id = entry.id.clone();
        entries.insert(0, entry);

        if let Err(e) = self.snapshot.save(&entries) {
            entries.remove(0);
            warn!(error = %e, "write-through save failed, append rolled back");
            return Err(e);
        }

        info!(id = %id, count = entries.len(), "activity recorded");
        Ok(AppendOutcome { accepted: true, id })
    }

    /// Filtered, sorted, paginated read.
    pub fn query(&self, params: &QueryParams) -> QueryPage {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let mut matched: Vec<ActivityEntry> = entries
            .iter()
            .filter(|e| {
                params.agent.as_deref().map_or(true, |a| e.agent == a)
                    && params.kind.as_deref().map_or(true, |k| e.kind == k)
            })
            .cloned()
            .collect();

        match params.sort {
            SortOrder::TimestampAsc => matched.sort_by(|a, b| a.timestamp.cmp(&b.timestamp)),
            SortOrder::TimestampDesc => matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
        }

        let total = matched.len();
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
        let page: Vec<ActivityEntry> = matched
            .into_iter()
            .skip(params.offset)
            .take(limit)
            .collect();

        QueryPage {
            entries: page,
            total,
            limit,
            offset: params.offset,
        }
    }

    /// Aggregate counts against the caller's wall-clock `now`, using UTC
    /// day boundaries for `today`.
    pub fn aggregate_stats(&self, now: DateTime<Utc>) -> ActivityStats {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let today_start = now.date_naive();
        let week_start = now - Duration::days(7);

        let mut by_agent: HashMap<String, usize> = HashMap::new();
        let mut by_type: HashMap<String, usize> = HashMap::new();
        let mut today = 0;
        let mut this_week = 0;

        for e in entries.iter() {
            *by_agent.entry(e.agent.clone()).or_default() += 1;
            *by_type.entry(e.kind.clone()).or_default() += 1;
            if e.timestamp.date_naive() == today_start {
                today += 1;
            }
            if e.timestamp >= week_start {
                this_week += 1;
            }
        }

        ActivityStats {
            total: entries.len(),
            today,
            this_week,
            by_agent,
            by_type,
        }
    }

    /// Drop entries older than the retention horizon, measured against each
    /// entry's own timestamp. Idempotent; safe to call on any schedule.
    pub fn sweep_retention(&self, now: DateTime<Utc>) -> Result<usize, TrackerError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let horizon = now - self.retention;

        let before = entries.len();
        let kept: Vec<ActivityEntry> = entries
            .iter()
            .filter(|e| e.timestamp >= horizon)
            .cloned()
            .collect();
        let removed = before - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        let previous = std::mem::replace(&mut *entries, kept);
        if let Err(e) = self.snapshot.save(&entries) {
            *entries = previous;
            warn!(error = %e, "retention sweep save failed, sweep rolled back");
            return Err(e);
        }

        info!(removed, remaining = entries.len(), "retention sweep");
        Ok(removed)
    }

    /// Number of stored entries.
    pub fn count(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Timestamp of the newest stored entry, if any.
    pub fn newest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|e| e.timestamp)
            .max()
    }
}
