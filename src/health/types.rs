use serde::{Deserialize, Serialize};

/// §3 HealthStatus.state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub last_success_time: Option<chrono::DateTime<chrono::Utc>>,
    pub circuit_open: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub total_checks: u32,
    pub total_failures: u32,
}

/// On-disk shape of the small state file persisted after every transition.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedStatus {
    pub state: HealthState,
}
