//! Application-wide shared state, constructed once at startup and handed
//! to the web layer behind an `Arc` (§9 "Global state ... constructed at
//! startup and passed explicitly; no implicit global lookup").

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::ConfigProvider;
use crate::controller::Controller;
use crate::events::EventBus;
use crate::rpc::RpcServer;

pub struct AppState {
    pub config: Arc<ConfigProvider>,
    pub events: Arc<EventBus>,
    pub controller: Arc<Controller>,
    pub rpc: Arc<RpcServer>,
    shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(config: Arc<ConfigProvider>, events: Arc<EventBus>, controller: Arc<Controller>, rpc: Arc<RpcServer>) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self { config, events, controller, rpc, shutdown_tx })
    }

    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn max_auth_failures(&self) -> u32 {
        self.config.snapshot().auth.max_auth_failures
    }
}
