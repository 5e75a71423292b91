//! Health Monitor (C4): polls the Router Client at a configured interval,
//! runs a circuit breaker with jittered exponential backoff, and persists
//! its last-known status so a restart re-enters `DEGRADED` rather than an
//! optimistic `HEALTHY` (§4.4).

mod types;

pub use types::{HealthMetrics, HealthState, HealthStatus};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::events::{DomainEvent, EventBus};
use crate::router::RouterClient;

pub struct HealthMonitorConfig {
    pub health_check_interval: Duration,
    pub failure_threshold: u32,
    pub recovery_threshold: u32,
    pub circuit_breaker_timeout: Duration,
    pub backoff_multiplier: f64,
    pub backoff_jitter_low: f64,
    pub backoff_jitter_high: f64,
    pub max_backoff: Duration,
    pub state_file: Option<PathBuf>,
}

struct Inner {
    state: HealthState,
    consecutive_failures: u32,
    recovery_confirmations: u32,
    last_success_time: Option<chrono::DateTime<chrono::Utc>>,
    circuit_open: bool,
    backoff_exponent: u32,
}

pub struct HealthMonitor {
    config: HealthMonitorConfig,
    router: Arc<RouterClient>,
    events: Arc<EventBus>,
    inner: RwLock<Inner>,
    running: AtomicBool,
    total_checks: AtomicU32,
    total_failures: AtomicU32,
}

impl HealthMonitor {
    pub fn new(config: HealthMonitorConfig, router: Arc<RouterClient>, events: Arc<EventBus>) -> Self {
        // §4.4 persistence: a prior failed exit re-enters DEGRADED, not HEALTHY.
        let initial_state = config
            .state_file
            .as_ref()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|s| serde_json::from_str::<types::PersistedStatus>(&s).ok())
            .map(|p| p.state)
            .unwrap_or(HealthState::Degraded);

        Self {
            config,
            router,
            events,
            inner: RwLock::new(Inner {
                state: initial_state,
                consecutive_failures: 0,
                recovery_confirmations: 0,
                last_success_time: None,
                circuit_open: false,
                backoff_exponent: 0,
            }),
            running: AtomicBool::new(false),
            total_checks: AtomicU32::new(0),
            total_failures: AtomicU32::new(0),
        }
    }

    pub async fn start(self: &Arc<Self>, cancel: CancellationToken) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AppError::AlreadyRunning("health monitor".to_string()));
        }

        let this = self.clone();
        tokio::spawn(async move {
            this.run_loop(cancel).await;
            this.running.store(false, Ordering::SeqCst);
        });
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(AppError::NotRunning("health monitor".to_string()));
        }
        Ok(())
    }

    async fn run_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.health_check_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("health monitor loop stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.check_once().await;
                }
            }
        }
    }

    async fn check_once(&self) {
        self.total_checks.fetch_add(1, Ordering::Relaxed);

        let circuit_open = self.inner.read().await.circuit_open;
        if circuit_open {
            // Half-open: allow exactly one probe through per backoff window.
            let delay = self.current_backoff().await;
            tokio::time::sleep(delay).await;
        }

        match self.router.get_health().await {
            Ok(h) if h.reachable => self.record_success().await,
            _ => self.record_failure().await,
        }
    }

    async fn current_backoff(&self) -> Duration {
        let exponent = self.inner.read().await.backoff_exponent;
        let base = self.config.circuit_breaker_timeout.as_secs_f64().max(1.0);
        let raw = base * self.config.backoff_multiplier.powi(exponent as i32);
        let capped = raw.min(self.config.max_backoff.as_secs_f64());
        let jitter = {
            let mut rng = rand::thread_rng();
            rng.gen_range(self.config.backoff_jitter_low..=self.config.backoff_jitter_high)
        };
        Duration::from_secs_f64(capped * (1.0 + jitter))
    }

    /// Record a successful probe (§4.4 state machine).
    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        inner.last_success_time = Some(chrono::Utc::now());

        match inner.state {
            HealthState::Healthy => {
                inner.consecutive_failures = 0;
            }
            HealthState::Degraded => {
                inner.consecutive_failures = 0;
                inner.state = HealthState::Healthy;
                inner.backoff_exponent = 0;
                info!("health monitor recovered to HEALTHY");
            }
            HealthState::Unhealthy => {
                inner.recovery_confirmations += 1;
                if inner.recovery_confirmations >= self.config.recovery_threshold {
                    inner.state = HealthState::Healthy;
                    inner.circuit_open = false;
                    inner.consecutive_failures = 0;
                    inner.recovery_confirmations = 0;
                    inner.backoff_exponent = 0;
                    info!("circuit closed, health monitor recovered to HEALTHY");
                    self.events.publish(DomainEvent::RouterHealthChanged {
                        status: "healthy".to_string(),
                        circuit_open: false,
                    });
                }
            }
        }
        drop(inner);
        self.persist_status().await;
    }

    /// Record a failed probe (§4.4 state machine).
    pub async fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write().await;
        inner.consecutive_failures += 1;
        inner.recovery_confirmations = 0;

        match inner.state {
            HealthState::Healthy => {
                inner.state = HealthState::Degraded;
                warn!(consecutive_failures = inner.consecutive_failures, "health monitor degraded");
            }
            HealthState::Degraded => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = HealthState::Unhealthy;
                    inner.circuit_open = true;
                    inner.backoff_exponent = 0;
                    warn!("circuit opened, health monitor UNHEALTHY");
                    self.events.publish(DomainEvent::RouterHealthChanged {
                        status: "unhealthy".to_string(),
                        circuit_open: true,
                    });
                }
            }
            HealthState::Unhealthy => {
                inner.backoff_exponent = inner.backoff_exponent.saturating_add(1);
                debug!(exponent = inner.backoff_exponent, "half-open probe failed, re-opening circuit");
            }
        }
        drop(inner);
        self.persist_status().await;
    }

    pub async fn get_status(&self) -> HealthStatus {
        let inner = self.inner.read().await;
        HealthStatus {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_success_time: inner.last_success_time,
            circuit_open: inner.circuit_open,
        }
    }

    pub async fn is_healthy(&self) -> bool {
        self.inner.read().await.state == HealthState::Healthy
    }

    pub async fn is_circuit_open(&self) -> bool {
        self.inner.read().await.circuit_open
    }

    pub fn get_metrics(&self) -> HealthMetrics {
        HealthMetrics {
            total_checks: self.total_checks.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
        }
    }

    async fn persist_status(&self) {
        let Some(path) = &self.config.state_file else { return };
        let state = self.inner.read().await.state;
        let persisted = types::PersistedStatus { state };
        if let Ok(json) = serde_json::to_string(&persisted) {
            if let Err(e) = tokio::fs::write(path, json).await {
                warn!(error = %e, "failed to persist health monitor status");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(state_file: Option<PathBuf>) -> HealthMonitorConfig {
        HealthMonitorConfig {
            health_check_interval: Duration::from_millis(50),
            failure_threshold: 3,
            recovery_threshold: 2,
            circuit_breaker_timeout: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            backoff_jitter_low: 0.0,
            backoff_jitter_high: 0.0,
            max_backoff: Duration::from_secs(1),
            state_file,
        }
    }

    fn test_monitor() -> HealthMonitor {
        let router = Arc::new(RouterClient::new("127.0.0.1", 9997, 0, Duration::from_millis(10), Duration::from_millis(50)));
        let events = Arc::new(EventBus::new());
        HealthMonitor::new(test_config(None), router, events)
    }

    #[tokio::test]
    async fn starts_degraded_by_default() {
        let monitor = test_monitor();
        assert_eq!(monitor.get_status().await.state, HealthState::Degraded);
    }

    #[tokio::test]
    async fn failures_below_threshold_stay_degraded() {
        let monitor = test_monitor();
        monitor.record_failure().await;
        assert_eq!(monitor.get_status().await.state, HealthState::Degraded);
        assert!(!monitor.is_circuit_open().await);
    }

    #[tokio::test]
    async fn failure_threshold_opens_circuit() {
        let monitor = test_monitor();
        for _ in 0..3 {
            monitor.record_failure().await;
        }
        assert!(monitor.is_circuit_open().await);
        assert_eq!(monitor.get_status().await.state, HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn recovery_threshold_closes_circuit() {
        let monitor = test_monitor();
        for _ in 0..3 {
            monitor.record_failure().await;
        }
        assert!(monitor.is_circuit_open().await);

        monitor.record_success().await;
        assert!(monitor.is_circuit_open().await, "one success below recovery_threshold keeps circuit open");

        monitor.record_success().await;
        assert!(!monitor.is_circuit_open().await);
        assert_eq!(monitor.get_status().await.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn success_from_healthy_resets_failure_count() {
        let monitor = test_monitor();
        monitor.record_success().await;
        assert!(monitor.is_healthy().await);
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let monitor = Arc::new(test_monitor());
        let cancel = CancellationToken::new();
        monitor.start(cancel.clone()).await.unwrap();
        let result = monitor.start(cancel.clone()).await;
        assert!(matches!(result, Err(AppError::AlreadyRunning(_))));
        cancel.cancel();
    }

    #[tokio::test]
    async fn stop_without_start_fails() {
        let monitor = test_monitor();
        assert!(matches!(monitor.stop(), Err(AppError::NotRunning(_))));
    }

    #[tokio::test]
    async fn status_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("health.json");

        let monitor = HealthMonitor::new(
            test_config(Some(state_file.clone())),
            Arc::new(RouterClient::new("127.0.0.1", 9997, 0, Duration::from_millis(10), Duration::from_millis(50))),
            Arc::new(EventBus::new()),
        );
        monitor.record_success().await;
        assert!(monitor.is_healthy().await);

        let restarted = HealthMonitor::new(
            test_config(Some(state_file)),
            Arc::new(RouterClient::new("127.0.0.1", 9997, 0, Duration::from_millis(10), Duration::from_millis(50))),
            Arc::new(EventBus::new()),
        );
        assert_eq!(restarted.get_status().await.state, HealthState::Healthy);
    }
}
