//! RPC Server metrics (§4.9): request/error counters, per-method response
//! time samples, active connection gauge. Retrieved via `get_metrics`
//! (admin only).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

const MAX_SAMPLES_PER_METHOD: usize = 256;

pub struct ServerMetrics {
    request_count: AtomicU64,
    error_count: AtomicU64,
    active_connections: AtomicI64,
    response_times: RwLock<HashMap<String, Vec<f64>>>,
    start_time: chrono::DateTime<chrono::Utc>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            active_connections: AtomicI64::new(0),
            response_times: RwLock::new(HashMap::new()),
            start_time: chrono::Utc::now(),
        }
    }

    pub fn record_request(&self, method: &str, elapsed: Duration, is_error: bool) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        if is_error {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        let mut table = self.response_times.write();
        let samples = table.entry(method.to_string()).or_default();
        if samples.len() >= MAX_SAMPLES_PER_METHOD {
            samples.remove(0);
        }
        samples.push(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let response_times = self.response_times.read().clone();
        MetricsSnapshot {
            request_count: self.request_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed).max(0) as u64,
            response_times,
            start_time: self.start_time,
        }
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub request_count: u64,
    pub error_count: u64,
    pub active_connections: u64,
    pub response_times: HashMap<String, Vec<f64>>,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_requests_and_errors_separately() {
        let metrics = ServerMetrics::new();
        metrics.record_request("ping", Duration::from_millis(5), false);
        metrics.record_request("ping", Duration::from_millis(7), true);

        let snap = metrics.snapshot();
        assert_eq!(snap.request_count, 2);
        assert_eq!(snap.error_count, 1);
        assert_eq!(snap.response_times["ping"].len(), 2);
    }

    #[test]
    fn connection_gauge_tracks_open_and_close() {
        let metrics = ServerMetrics::new();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();
        assert_eq!(metrics.snapshot().active_connections, 1);
    }
}
