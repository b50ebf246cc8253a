//! Dashboard read-path orchestrator.
//!
//! Loads the externally produced data documents through the resilient fetch
//! layer (with the cache coordinator underneath), evaluates freshness, and
//! keeps the latest snapshot for display. Every document loads
//! independently — one unavailable resource never blocks the others.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::cache::CoordinatorHandle;
use crate::entry::ActivityEntry;
use crate::error::TrackerError;
use crate::fetch::{ResilientFetcher, ResourceRequest, RetryPolicy};
use crate::freshness::{self, FreshnessReport};
use crate::persist::LogDocument;

/// Collector-written metadata document (`meta.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaDoc {
    #[serde(rename = "lastUpdated", default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(rename = "syncStatus", default)]
    pub sync_status: Option<String>,
    #[serde(rename = "totalActivities", default)]
    pub total_activities: Option<usize>,
    /// Deployment version token, bumped by the collector on every sync.
    #[serde(rename = "cacheBust", default)]
    pub cache_bust: Option<String>,
}

/// One periodic audit result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub summary: String,
}

/// One step inside a multi-step job chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainStep {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub description: String,
}

/// A multi-step job chain run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobChain {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub steps: Vec<ChainStep>,
}

/// An agent profile card.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
struct AuditsDoc {
    #[serde(default)]
    audits: Vec<AuditRecord>,
}

#[derive(Debug, Default, Deserialize)]
struct ChainsDoc {
    #[serde(default)]
    chains: Vec<JobChain>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentsDoc {
    #[serde(default)]
    agents: Vec<AgentProfile>,
}

/// Everything the dashboard currently shows, plus which resources degraded.
#[derive(Debug, Clone, Default)]
pub struct DashboardSnapshot {
    pub activities: Vec<ActivityEntry>,
    pub audits: Vec<AuditRecord>,
    pub chains: Vec<JobChain>,
    pub agents: Vec<AgentProfile>,
    pub meta: MetaDoc,
    pub failed_resources: Vec<String>,
    pub loaded_at: Option<DateTime<Utc>>,
}

impl DashboardSnapshot {
    pub fn newest_entry_timestamp(&self) -> Option<DateTime<Utc>> {
        self.activities.iter().map(|e| e.timestamp).max()
    }
}

#[derive(Default)]
struct ClientState {
    snapshot: DashboardSnapshot,
    freshness: Option<FreshnessReport>,
    seen_version: Option<String>,
}

const ACTIVITY_LOG_PATH: &str = "/data/activity-log.json";
const AUDITS_PATH: &str = "/data/audits.json";
const CHAINS_PATH: &str = "/data/chains.json";
const AGENTS_PATH: &str = "/data/agents.json";
const META_PATH: &str = "/meta.json";

/// Client side of the data flow: resilient fetch → coordinator → network.
pub struct DashboardClient {
    fetcher: ResilientFetcher<CoordinatorHandle>,
    coordinator: CoordinatorHandle,
    state: Mutex<ClientState>,
}

impl DashboardClient {
    pub fn new(coordinator: CoordinatorHandle, policy: RetryPolicy) -> Self {
        Self {
            fetcher: ResilientFetcher::new(coordinator.clone(), policy),
            coordinator,
            state: Mutex::new(ClientState::default()),
        }
    }

    /// Load one document, degrading to its default on failure.
    async fn load_doc<T: serde::de::DeserializeOwned + Default>(
        &self,
        path: &str,
        failed: &mut Vec<String>,
    ) -> T {
        match self.fetcher.fetch_json::<T>(&ResourceRequest::new(path)).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!(path, error = %e, "resource failed to load, using fallback");
                failed.push(path.to_string());
                T::default()
            }
        }
    }

    /// Reload every dashboard document and re-evaluate freshness.
    pub async fn reload(&self) -> FreshnessReport {
        let mut failed = Vec::new();

        let log: LogDocument = self.load_doc(ACTIVITY_LOG_PATH, &mut failed).await;
        let audits: AuditsDoc = self.load_doc(AUDITS_PATH, &mut failed).await;
        let chains: ChainsDoc = self.load_doc(CHAINS_PATH, &mut failed).await;
        let agents: AgentsDoc = self.load_doc(AGENTS_PATH, &mut failed).await;
        let meta: MetaDoc = self.load_doc(META_PATH, &mut failed).await;

        let now = Utc::now();
        let snapshot = DashboardSnapshot {
            activities: log.entries,
            audits: audits.audits,
            chains: chains.chains,
            agents: agents.agents,
            meta,
            failed_resources: failed,
            loaded_at: Some(now),
        };

        let report = freshness::evaluate(
            snapshot.meta.last_updated,
            snapshot.newest_entry_timestamp(),
            now,
        );

        // A bumped version token means a new deployment: tell the
        // coordinator so stale caches are reset.
        let new_version = snapshot.meta.cache_bust.clone();
        let version_changed = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let changed = new_version.is_some() && new_version != state.seen_version;
            if changed {
                state.seen_version = new_version.clone();
            }
            state.snapshot = snapshot;
            state.freshness = Some(report);
            changed
        };
        if version_changed {
            if let Some(version) = new_version {
                match self.coordinator.activate(&version).await {
                    Ok(deleted) => {
                        info!(version, deleted = deleted.len(), "deployment version changed")
                    }
                    Err(e) => warn!(error = %e, "coordinator activation failed"),
                }
            }
        }

        report
    }

    /// Cheap freshness pass: re-fetch only the metadata document and combine
    /// with the already loaded content's newest timestamp.
    pub async fn evaluate_freshness(&self) -> FreshnessReport {
        let meta = self
            .fetcher
            .fetch_json::<MetaDoc>(&ResourceRequest::new(META_PATH))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "metadata refresh failed");
                MetaDoc::default()
            });

        let now = Utc::now();
        let newest = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.snapshot.newest_entry_timestamp()
        };
        let report = freshness::evaluate(meta.last_updated, newest, now);

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.snapshot.meta = meta;
        state.freshness = Some(report);
        report
    }

    /// One-click recovery: purge every cache layer (waiting for the
    /// coordinator's acknowledgement) and force a full reload.
    pub async fn hard_reset(&self) -> Result<FreshnessReport, TrackerError> {
        let purged = self.coordinator.purge_all().await?;
        info!(purged, "hard reset: caches purged, reloading");
        Ok(self.reload().await)
    }

    /// Latest loaded snapshot (clone).
    pub fn snapshot(&self) -> DashboardSnapshot {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot
            .clone()
    }

    /// Latest freshness verdict, if any evaluation has run.
    pub fn freshness(&self) -> Option<FreshnessReport> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .freshness
    }
}
