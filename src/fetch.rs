//! Resilient reads of remote dashboard resources.
//!
//! Every logical read gets a bounded per-attempt deadline and linear-backoff
//! retries. The delivery path between the origin file and the reader has
//! several caching layers that have each served stale bytes in the past, so
//! this layer always requests a cache bypass.

use serde::de::DeserializeOwned;
use std::io::Read;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::TrackerError;

/// How a request should treat intermediate caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Default,
    /// Defeat every cache between here and the origin.
    Bypass,
}

/// A single logical read of a remote resource.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    /// Path relative to the deployment base, e.g. `/data/activity-log.json`
    pub path: String,
    /// Raw query string without the leading `?`
    pub query: Option<String>,
    pub cache_mode: CacheMode,
}

impl ResourceRequest {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            query: None,
            cache_mode: CacheMode::Default,
        }
    }

    /// Path plus query string, as routed by the cache coordinator.
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }
}

/// Bytes obtained for a request, from the network or a cache layer.
#[derive(Debug, Clone)]
pub struct FetchedPayload {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl FetchedPayload {
    pub fn is_ok(&self) -> bool {
        self.status < 400
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TrackerError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Anything that can resolve a [`ResourceRequest`] to bytes. Implemented by
/// the cache coordinator handle and by test doubles.
#[allow(async_fn_in_trait)]
pub trait FetchSource {
    async fn fetch(&self, req: &ResourceRequest) -> Result<FetchedPayload, TrackerError>;
}

/// Retry schedule: `max_retries` retries after the first attempt, waiting
/// `base_delay × attempt_number` between attempts. Linear, not exponential.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempt_timeout: Duration,
    pub base_delay: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(10),
            base_delay: Duration::from_secs(1),
            max_retries: 3,
        }
    }
}

/// Wraps a [`FetchSource`] with timeout and retry. On exhaustion the failure
/// is surfaced to the caller, who supplies a per-resource fallback — one
/// unavailable resource must never abort loading of the others.
pub struct ResilientFetcher<S: FetchSource> {
    source: S,
    policy: RetryPolicy,
}

impl<S: FetchSource> ResilientFetcher<S> {
    pub fn new(source: S, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    /// Fetch with the full timeout/retry contract. Every attempt bypasses
    /// caching — the caller always wants the freshest bytes obtainable.
    pub async fn fetch(&self, req: &ResourceRequest) -> Result<FetchedPayload, TrackerError> {
        let mut req = req.clone();
        req.cache_mode = CacheMode::Bypass;

        let attempts = self.policy.max_retries + 1;
        let mut last_failure = String::new();

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.policy.attempt_timeout, self.source.fetch(&req)).await {
                Ok(Ok(payload)) if payload.is_ok() => {
                    debug!(path = %req.path, attempt, "fetch succeeded");
                    return Ok(payload);
                }
                Ok(Ok(payload)) => {
                    last_failure = format!("status {}", payload.status);
                }
                Ok(Err(e)) => {
                    last_failure = e.to_string();
                }
                Err(_) => {
                    last_failure = format!(
                        "attempt timed out after {}s",
                        self.policy.attempt_timeout.as_secs()
                    );
                }
            }

            if attempt < attempts {
                let delay = self.policy.base_delay * attempt;
                warn!(path = %req.path, attempt, delay_ms = delay.as_millis() as u64,
                      reason = %last_failure, "fetch attempt failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }

        warn!(path = %req.path, attempts, reason = %last_failure, "fetch exhausted");
        Err(TrackerError::FetchExhausted {
            attempts,
            reason: last_failure,
        })
    }

    /// Fetch and deserialize a JSON document.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        req: &ResourceRequest,
    ) -> Result<T, TrackerError> {
        self.fetch(req).await?.json()
    }
}

/// Blocking HTTP backend over `ureq`, driven from async code via
/// `spawn_blocking`. Dyn-safe so the coordinator can hold it behind an `Arc`.
pub trait NetworkBackend: Send + Sync + 'static {
    fn get(&self, req: &ResourceRequest) -> Result<FetchedPayload, TrackerError>;
}

/// Real network backend for the deployed dashboard documents.
pub struct HttpFetcher {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn url_for(&self, req: &ResourceRequest) -> String {
        let mut url = format!("{}{}", self.base_url, req.path);
        let mut sep = '?';
        if let Some(q) = &req.query {
            url.push(sep);
            url.push_str(q);
            sep = '&';
        }
        if req.cache_mode == CacheMode::Bypass {
            // Cache-defeat parameter: CDN and deployment caches key on the
            // full URL, so a unique query string forces an origin read.
            url.push(sep);
            url.push_str(&format!("nocache={}", chrono::Utc::now().timestamp_millis()));
        }
        url
    }
}

impl NetworkBackend for HttpFetcher {
    fn get(&self, req: &ResourceRequest) -> Result<FetchedPayload, TrackerError> {
        let url = self.url_for(req);
        let request = self.agent.get(&url).set("Cache-Control", "no-cache");

        match request.call() {
            Ok(resp) => {
                let status = resp.status();
                let content_type = resp.content_type().to_string();
                let mut body = Vec::new();
                resp.into_reader()
                    .read_to_end(&mut body)
                    .map_err(|e| TrackerError::ConnectionError(e.to_string()))?;
                Ok(FetchedPayload {
                    status,
                    content_type,
                    body,
                })
            }
            Err(ureq::Error::Status(code, _)) => {
                Err(TrackerError::Unavailable(format!("{url}: status {code}")))
            }
            Err(e) => Err(TrackerError::ConnectionError(e.to_string())),
        }
    }
}
