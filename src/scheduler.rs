//! Auto-refresh scheduling for the dashboard client.
//!
//! Two cadences run independently: a cheap freshness re-evaluation and a
//! full data reload. Timers are tagged state — either disarmed or armed
//! with a task handle — and re-arming always cancels the prior handle
//! first, so interval changes can never stack timers.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::client::DashboardClient;

/// A cancellable scheduled task. Never armed twice: arming goes through
/// [`TimerState::disarm`] first.
enum TimerState {
    Disarmed,
    Armed(JoinHandle<()>),
}

impl TimerState {
    fn disarm(&mut self) {
        if let TimerState::Armed(handle) = std::mem::replace(self, TimerState::Disarmed) {
            handle.abort();
        }
    }

    fn is_armed(&self) -> bool {
        matches!(self, TimerState::Armed(_))
    }
}

/// Periodically re-triggers the read path and re-evaluates freshness.
pub struct AutoRefreshScheduler {
    client: Arc<DashboardClient>,
    enabled: bool,
    freshness_interval: Duration,
    reload_interval: Duration,
    freshness_timer: TimerState,
    reload_timer: TimerState,
}

impl AutoRefreshScheduler {
    pub fn new(
        client: Arc<DashboardClient>,
        enabled: bool,
        freshness_interval: Duration,
        reload_interval: Duration,
    ) -> Self {
        Self {
            client,
            enabled,
            freshness_interval,
            reload_interval,
            freshness_timer: TimerState::Disarmed,
            reload_timer: TimerState::Disarmed,
        }
    }

    /// Arm both timers (cancelling any prior ones). No-op while disabled.
    pub fn start(&mut self) {
        if !self.enabled {
            return;
        }
        self.arm_reload_timer();
        self.arm_freshness_timer();
        info!(
            freshness_secs = self.freshness_interval.as_secs(),
            reload_secs = self.reload_interval.as_secs(),
            "auto-refresh armed"
        );
    }

    /// Enable or disable auto-refresh. Disabling cancels both timers.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if enabled {
            self.start();
        } else {
            self.freshness_timer.disarm();
            self.reload_timer.disarm();
            info!("auto-refresh disabled, timers cancelled");
        }
    }

    /// Change the full-reload cadence; the existing timer is cancelled
    /// before the new one is armed.
    pub fn set_reload_interval(&mut self, interval: Duration) {
        self.reload_interval = interval;
        if self.enabled {
            self.arm_reload_timer();
        }
    }

    /// Change the freshness re-evaluation cadence.
    pub fn set_freshness_interval(&mut self, interval: Duration) {
        self.freshness_interval = interval;
        if self.enabled {
            self.arm_freshness_timer();
        }
    }

    /// Immediate refresh on regained visibility — network-layer staleness
    /// is most likely to have happened while nobody was looking. Runs as
    /// its own task so an in-flight refresh never blocks it.
    pub fn notify_visible(&self) {
        let client = Arc::clone(&self.client);
        tokio::spawn(async move {
            debug!("visibility regained, refreshing");
            client.reload().await;
        });
    }

    pub fn is_running(&self) -> bool {
        self.reload_timer.is_armed() || self.freshness_timer.is_armed()
    }

    fn arm_reload_timer(&mut self) {
        self.reload_timer.disarm();
        let client = Arc::clone(&self.client);
        let interval = self.reload_interval;
        self.reload_timer = TimerState::Armed(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                client.reload().await;
            }
        }));
    }

    fn arm_freshness_timer(&mut self) {
        self.freshness_timer.disarm();
        let client = Arc::clone(&self.client);
        let interval = self.freshness_interval;
        self.freshness_timer = TimerState::Armed(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let report = client.evaluate_freshness().await;
                if report.needs_refresh() {
                    // Stale metadata overrides the configured reload cadence.
                    info!(state = %report.metadata, "stale metadata, forcing reload");
                    client.reload().await;
                }
            }
        }));
    }
}

impl Drop for AutoRefreshScheduler {
    fn drop(&mut self) {
        self.freshness_timer.disarm();
        self.reload_timer.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache;
    use crate::error::TrackerError;
    use crate::fetch::{FetchedPayload, NetworkBackend, ResourceRequest, RetryPolicy};
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingNetwork {
        calls: AtomicU32,
    }

    impl NetworkBackend for CountingNetwork {
        fn get(&self, req: &ResourceRequest) -> Result<FetchedPayload, TrackerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body = if req.path == "/meta.json" {
                serde_json::json!({ "lastUpdated": Utc::now().to_rfc3339() })
            } else {
                serde_json::json!({ "entries": [] })
            };
            Ok(FetchedPayload {
                status: 200,
                content_type: "application/json".into(),
                body: serde_json::to_vec(&body).unwrap(),
            })
        }
    }

    fn quick_client(network: Arc<CountingNetwork>) -> Arc<DashboardClient> {
        let handle = cache::spawn(network as Arc<dyn NetworkBackend>, "v1");
        Arc::new(DashboardClient::new(
            handle,
            RetryPolicy {
                attempt_timeout: Duration::from_millis(500),
                base_delay: Duration::from_millis(1),
                max_retries: 0,
            },
        ))
    }

    #[tokio::test]
    async fn test_reload_timer_fires_periodically() {
        let network = Arc::new(CountingNetwork { calls: AtomicU32::new(0) });
        let client = quick_client(network.clone());

        let mut sched = AutoRefreshScheduler::new(
            client,
            true,
            Duration::from_secs(3600),
            Duration::from_millis(20),
        );
        sched.start();
        assert!(sched.is_running());

        tokio::time::sleep(Duration::from_millis(120)).await;
        sched.set_enabled(false);
        // At least two full reloads of 5 documents each.
        assert!(network.calls.load(Ordering::SeqCst) >= 10);
    }

    #[tokio::test]
    async fn test_disabling_cancels_timers() {
        let network = Arc::new(CountingNetwork { calls: AtomicU32::new(0) });
        let client = quick_client(network.clone());

        let mut sched = AutoRefreshScheduler::new(
            client,
            true,
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        sched.start();
        sched.set_enabled(false);
        assert!(!sched.is_running());

        let settled = network.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(network.calls.load(Ordering::SeqCst), settled);
    }

    #[tokio::test]
    async fn test_interval_change_rearms_without_stacking() {
        let network = Arc::new(CountingNetwork { calls: AtomicU32::new(0) });
        let client = quick_client(network.clone());

        let mut sched = AutoRefreshScheduler::new(
            client,
            true,
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        );
        sched.start();

        // Re-arm repeatedly with a long interval: if timers stacked, the
        // old short-lived handles would still fire.
        for _ in 0..5 {
            sched.set_reload_interval(Duration::from_secs(3600));
            sched.set_freshness_interval(Duration::from_secs(3600));
        }
        assert!(sched.is_running());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(network.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_while_disabled_is_noop() {
        let network = Arc::new(CountingNetwork { calls: AtomicU32::new(0) });
        let client = quick_client(network);

        let mut sched = AutoRefreshScheduler::new(
            client,
            false,
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        sched.start();
        assert!(!sched.is_running());
    }

    #[tokio::test]
    async fn test_visibility_triggers_immediate_reload() {
        let network = Arc::new(CountingNetwork { calls: AtomicU32::new(0) });
        let client = quick_client(network.clone());

        let sched = AutoRefreshScheduler::new(
            client,
            true,
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        );
        sched.notify_visible();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(network.calls.load(Ordering::SeqCst) >= 5);
    }
}
