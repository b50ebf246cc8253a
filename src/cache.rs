//! Cache coordinator — the installable intermediary between readers and the
//! network.
//!
//! Decides per request whether to bypass, refresh, or serve a stored copy,
//! and forces a hard reset across deployments through a version token: on
//! activation every cache whose name does not match the current token is
//! deleted. Install never pre-populates a cache — eager caching of dynamic
//! content is the documented prior failure mode that kept stale data on
//! screen for days.
//!
//! Runs in its own task and talks to the rest of the process only through
//! typed request/response messages; there is no shared mutable state.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::TrackerError;
use crate::fetch::{CacheMode, FetchSource, FetchedPayload, NetworkBackend, ResourceRequest};

/// Deployment lifecycle of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Installing,
    Active { version: String },
    Activating { version: String },
}

/// Per-request routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutePolicy {
    /// Always network with caching disabled; stored copy only as fallback.
    NetworkOnly,
    /// Stored copy preferred; network on miss.
    CacheFirst,
    /// Network preferred; stored copy on failure.
    NetworkFirst,
}

const STATIC_SUFFIXES: &[&str] = &[".css", ".js", ".svg", ".png", ".ico", ".woff2"];

/// Classify a request. Structured data and page documents are never served
/// from cache when the network is reachable — those are exactly the
/// resources that went stale in production.
pub fn route(req: &ResourceRequest) -> RoutePolicy {
    let path = req.path.as_str();
    if path.ends_with(".json") || path.ends_with(".html") || path == "/" {
        return RoutePolicy::NetworkOnly;
    }
    let cache_defeat = req.cache_mode == CacheMode::Bypass
        || req
            .query
            .as_deref()
            .map(|q| q.split('&').any(|p| p == "nocache" || p.starts_with("nocache=")))
            .unwrap_or(false);
    if cache_defeat {
        return RoutePolicy::NetworkOnly;
    }
    if STATIC_SUFFIXES.iter().any(|s| path.ends_with(s)) {
        return RoutePolicy::CacheFirst;
    }
    RoutePolicy::NetworkFirst
}

/// Version-named cache buckets plus the lifecycle state machine.
///
/// Synchronous core so the routing and reset logic is unit-testable without
/// the task plumbing around it.
pub struct CoordinatorCore {
    state: WorkerState,
    caches: HashMap<String, HashMap<String, FetchedPayload>>,
}

impl CoordinatorCore {
    pub fn new() -> Self {
        Self {
            state: WorkerState::Installing,
            caches: HashMap::new(),
        }
    }

    fn cache_name(version: &str) -> String {
        format!("nox-dashboard-{version}")
    }

    pub fn state(&self) -> &WorkerState {
        &self.state
    }

    /// Transition to `Active(version)`, deleting every cache whose name does
    /// not match the new version token. This is the hard-reset mechanism: a
    /// stale intermediary otherwise keeps serving bytes captured under a
    /// previous deployment indefinitely.
    pub fn activate(&mut self, version: &str) -> Vec<String> {
        self.state = WorkerState::Activating {
            version: version.to_string(),
        };
        let keep = Self::cache_name(version);
        let deleted: Vec<String> = self
            .caches
            .keys()
            .filter(|name| **name != keep)
            .cloned()
            .collect();
        self.caches.retain(|name, _| *name == keep);
        self.state = WorkerState::Active {
            version: version.to_string(),
        };
        if !deleted.is_empty() {
            info!(version, deleted = deleted.len(), "stale caches deleted on activation");
        }
        deleted
    }

    fn current_cache_name(&self) -> Option<String> {
        match &self.state {
            WorkerState::Active { version } | WorkerState::Activating { version } => {
                Some(Self::cache_name(version))
            }
            WorkerState::Installing => None,
        }
    }

    /// Stash a successful response as the last-known-good copy.
    pub fn stash(&mut self, path: &str, payload: FetchedPayload) {
        if let Some(name) = self.current_cache_name() {
            self.caches
                .entry(name)
                .or_default()
                .insert(path.to_string(), payload);
        }
    }

    /// Look up a stored copy in the current version's cache.
    pub fn lookup(&self, path: &str) -> Option<FetchedPayload> {
        let name = self.current_cache_name()?;
        self.caches.get(&name)?.get(path).cloned()
    }

    /// Delete every stored cache. Returns how many buckets were dropped.
    pub fn purge_all(&mut self) -> usize {
        let n = self.caches.len();
        self.caches.clear();
        n
    }

    pub fn cache_names(&self) -> Vec<String> {
        self.caches.keys().cloned().collect()
    }
}

impl Default for CoordinatorCore {
    fn default() -> Self {
        Self::new()
    }
}

/// Synthesized response returned instead of hanging when the network is down
/// and no stored copy exists.
fn unavailable_response(reason: &TrackerError) -> FetchedPayload {
    let body = serde_json::json!({
        "error": "resource unavailable",
        "reason": reason.to_string(),
    });
    FetchedPayload {
        status: 503,
        content_type: "application/json".to_string(),
        body: serde_json::to_vec(&body).unwrap_or_default(),
    }
}

async fn network_get(
    network: &Arc<dyn NetworkBackend>,
    req: ResourceRequest,
) -> Result<FetchedPayload, TrackerError> {
    let backend = Arc::clone(network);
    tokio::task::spawn_blocking(move || backend.get(&req))
        .await
        .map_err(|e| TrackerError::InternalError(format!("fetch task panicked: {e}")))?
}

/// Resolve one request against the core and the network per routing policy.
async fn resolve(
    core: &mut CoordinatorCore,
    network: &Arc<dyn NetworkBackend>,
    req: &ResourceRequest,
) -> Result<FetchedPayload, TrackerError> {
    match route(req) {
        RoutePolicy::NetworkOnly => {
            let mut net_req = req.clone();
            net_req.cache_mode = CacheMode::Bypass;
            match network_get(network, net_req).await {
                Ok(payload) => {
                    core.stash(&req.path, payload.clone());
                    Ok(payload)
                }
                Err(e) => match core.lookup(&req.path) {
                    Some(copy) => {
                        warn!(path = %req.path, error = %e, "network down, serving stored copy");
                        Ok(copy)
                    }
                    None => {
                        warn!(path = %req.path, error = %e, "network down, no stored copy");
                        Ok(unavailable_response(&e))
                    }
                },
            }
        }
        RoutePolicy::CacheFirst => {
            if let Some(copy) = core.lookup(&req.path) {
                debug!(path = %req.path, "cache hit");
                return Ok(copy);
            }
            let payload = network_get(network, req.clone()).await?;
            core.stash(&req.path, payload.clone());
            Ok(payload)
        }
        RoutePolicy::NetworkFirst => match network_get(network, req.clone()).await {
            Ok(payload) => {
                core.stash(&req.path, payload.clone());
                Ok(payload)
            }
            Err(e) => core.lookup(&req.path).ok_or(e),
        },
    }
}

/// Commands accepted by the coordinator task.
enum CacheCommand {
    Fetch {
        req: ResourceRequest,
        reply: oneshot::Sender<Result<FetchedPayload, TrackerError>>,
    },
    Activate {
        version: String,
        reply: oneshot::Sender<Vec<String>>,
    },
    PurgeAll {
        reply: oneshot::Sender<usize>,
    },
    State {
        reply: oneshot::Sender<WorkerState>,
    },
}

/// Clonable client side of the coordinator's command channel.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CacheCommand>,
}

impl CoordinatorHandle {
    async fn send<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> CacheCommand,
    ) -> Result<T, TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| TrackerError::CoordinatorGone("command channel closed".into()))?;
        rx.await
            .map_err(|_| TrackerError::CoordinatorGone("reply dropped".into()))
    }

    /// Activate a new deployment version, deleting mismatched caches.
    pub async fn activate(&self, version: &str) -> Result<Vec<String>, TrackerError> {
        self.send(|reply| CacheCommand::Activate {
            version: version.to_string(),
            reply,
        })
        .await
    }

    /// Purge every stored cache. The acknowledged count tells the hard-reset
    /// control it is safe to reload.
    pub async fn purge_all(&self) -> Result<usize, TrackerError> {
        self.send(|reply| CacheCommand::PurgeAll { reply }).await
    }

    pub async fn state(&self) -> Result<WorkerState, TrackerError> {
        self.send(|reply| CacheCommand::State { reply }).await
    }
}

impl FetchSource for CoordinatorHandle {
    async fn fetch(&self, req: &ResourceRequest) -> Result<FetchedPayload, TrackerError> {
        let req = req.clone();
        self.send(|reply| CacheCommand::Fetch { req, reply }).await?
    }
}

/// Spawn the coordinator task: install (no pre-population), activate the
/// given version token, then serve commands until every handle is dropped.
pub fn spawn(network: Arc<dyn NetworkBackend>, version: &str) -> CoordinatorHandle {
    let (tx, mut rx) = mpsc::channel::<CacheCommand>(64);
    let version = version.to_string();

    tokio::spawn(async move {
        let mut core = CoordinatorCore::new();
        core.activate(&version);
        info!(version, "cache coordinator active");

        while let Some(cmd) = rx.recv().await {
            match cmd {
                CacheCommand::Fetch { req, reply } => {
                    let result = resolve(&mut core, &network, &req).await;
                    let _ = reply.send(result);
                }
                CacheCommand::Activate { version, reply } => {
                    let _ = reply.send(core.activate(&version));
                }
                CacheCommand::PurgeAll { reply } => {
                    let purged = core.purge_all();
                    info!(purged, "all caches purged");
                    let _ = reply.send(purged);
                }
                CacheCommand::State { reply } => {
                    let _ = reply.send(core.state().clone());
                }
            }
        }
        debug!("cache coordinator stopped");
    });

    CoordinatorHandle { tx }
}
