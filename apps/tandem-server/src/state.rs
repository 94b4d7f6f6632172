use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tandem_core::RelayBroker;

use crate::config::ServerConfig;
use crate::websocket::SocketHub;

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<RelayBroker>,
    pub hub: Arc<SocketHub>,
    pub config: Arc<ServerConfig>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Self {
        let hub = Arc::new(SocketHub::new());
        let broker = Arc::new(RelayBroker::new(hub.clone(), config.broker.clone()));
        Self {
            broker,
            hub,
            config: Arc::new(config),
            metrics,
        }
    }
}
