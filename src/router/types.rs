use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSpec {
    pub source: String,
    #[serde(default)]
    pub source_on_demand: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterPath {
    pub name: String,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterStream {
    pub name: String,
    #[serde(default)]
    pub ready: bool,
}

#[derive(Debug, Clone)]
pub struct RouterHealth {
    pub reachable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterMetrics {
    #[serde(default)]
    pub connections: u64,
}
