pub mod cache;
pub mod client;
pub mod config;
pub mod entry;
pub mod error;
pub mod fetch;
pub mod freshness;
pub mod persist;
pub mod scheduler;
pub mod server;
pub mod store;

use crate::config::TrackerConfig;
use crate::entry::NewEntry;
use crate::error::TrackerError;
use crate::persist::JsonSnapshot;
use crate::store::{ActivityStats, ActivityStore, AppendOutcome, QueryPage, QueryParams};

/// The tracker engine — wires config, persistence and the store together
pub struct TrackerEngine {
    config: TrackerConfig,
    store: ActivityStore,
    start_time: chrono::DateTime<chrono::Utc>,
}

impl TrackerEngine {
    /// Create a new engine with the given config
    pub fn new(config: TrackerConfig) -> Self {
        let snapshot = JsonSnapshot::new(config.data_path());
        let store = ActivityStore::open(
            snapshot,
            &config.store.source_prefix,
            config.store.dedup_window_mins,
            config.store.retention_days,
        );

        Self {
            config,
            store,
            start_time: chrono::Utc::now(),
        }
    }

    /// Record one activity entry
    pub fn record(&self, new: NewEntry) -> Result<AppendOutcome, TrackerError> {
        self.store.append(new)
    }

    /// Query stored entries
    pub fn query(&self, params: &QueryParams) -> QueryPage {
        self.store.query(params)
    }

    /// Aggregate statistics over all stored entries
    pub fn stats(&self) -> ActivityStats {
        self.store.aggregate_stats(chrono::Utc::now())
    }

    /// Purge entries past the retention window. Returns (removed, remaining).
    pub fn cleanup(&self) -> Result<(usize, usize), TrackerError> {
        let removed = self.store.sweep_retention(chrono::Utc::now())?;
        Ok((removed, self.store.count()))
    }

    /// Get store reference
    pub fn store(&self) -> &ActivityStore {
        &self.store
    }

    /// Get config reference
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Get engine uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        (chrono::Utc::now() - self.start_time).num_seconds() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_engine(dir: &tempfile::TempDir) -> TrackerEngine {
        let mut config = TrackerConfig::default();
        config.store.data_path = Some(
            dir.path()
                .join("activity-log.json")
                .to_string_lossy()
                .to_string(),
        );
        TrackerEngine::new(config)
    }

    #[test]
    fn test_create_engine() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir);
        assert_eq!(engine.config().server.bind_addr, "127.0.0.1:3000");
        assert_eq!(engine.store().count(), 0);
    }

    #[test]
    fn test_record_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir);

        let outcome = engine
            .record(NewEntry {
                agent: Some("nox".into()),
                kind: Some("research".into()),
                description: Some("scanned feeds".into()),
                ..NewEntry::default()
            })
            .unwrap();
        assert!(outcome.accepted);

        let page = engine.query(&QueryParams::default());
        assert_eq!(page.total, 1);
        assert_eq!(page.entries[0].agent, "nox");
    }

    #[test]
    fn test_engine_reopens_persisted_entries() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = test_engine(&dir);
            engine
                .record(NewEntry {
                    agent: Some("main".into()),
                    kind: Some("deploy".into()),
                    description: Some("released v3".into()),
                    ..NewEntry::default()
                })
                .unwrap();
        }

        let engine = test_engine(&dir);
        assert_eq!(engine.store().count(), 1);
    }

    #[test]
    fn test_cleanup_reports_counts() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir);
        engine
            .record(NewEntry {
                timestamp: Some(chrono::Utc::now() - chrono::Duration::days(10)),
                agent: Some("nox".into()),
                kind: Some("note".into()),
                description: Some("old".into()),
                ..NewEntry::default()
            })
            .unwrap();
        engine
            .record(NewEntry {
                agent: Some("nox".into()),
                kind: Some("note".into()),
                description: Some("new".into()),
                ..NewEntry::default()
            })
            .unwrap();

        let (removed, remaining) = engine.cleanup().unwrap();
        assert_eq!(removed, 1);
        assert_eq!(remaining, 1);
    }

    #[test]
    fn test_uptime() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir);
        assert!(engine.uptime_secs() < 2);
    }
}
