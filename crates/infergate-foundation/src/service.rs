//! Composition root.
//!
//! [`Infergate`] owns one instance of every component and wires them
//! together from an [`InfergateConfig`]. Request handlers receive it (or the
//! pieces they need) by handle; nothing is process-global.

use crate::aggregation::AggregationEngine;
use crate::alerting::AlertingEngine;
use crate::bridge::AnalyticsBridge;
use crate::config::InfergateConfig;
use crate::dispatch::Dispatcher;
use crate::persistence::InMemoryStore;
use crate::registry::ModelRegistry;
use crate::telemetry::TelemetryRecorder;
use crate::worker::WorkerPool;
use infergate_kernel::HealthStatus;
use infergate_kernel::alert::DynAlertStore;
use infergate_kernel::telemetry::{DynTelemetryStore, HealthCheckRecord};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Infergate {
    pub config: InfergateConfig,
    pub registry: Arc<ModelRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub recorder: TelemetryRecorder,
    pub aggregation: Arc<AggregationEngine>,
    pub alerting: Arc<AlertingEngine>,
    pub telemetry_store: DynTelemetryStore,
    /// Shared by every [`BlockingModel`](crate::worker::BlockingModel).
    pub workers: WorkerPool,
}

impl Infergate {
    /// Wire every component over the given stores. Must be called inside a
    /// Tokio runtime (the recorder spawns its consumer task).
    pub fn start(
        config: InfergateConfig,
        telemetry: DynTelemetryStore,
        alerts: DynAlertStore,
    ) -> Self {
        let alerting = Arc::new(AlertingEngine::new(
            telemetry.clone(),
            alerts.clone(),
            config.alerting.clone(),
        ));
        let recorder =
            TelemetryRecorder::start(telemetry.clone(), Some(alerting.clone()), &config.telemetry);
        let aggregation = Arc::new(AggregationEngine::new(telemetry.clone(), alerts));
        let registry = Arc::new(ModelRegistry::new());

        let mut dispatcher =
            Dispatcher::new(registry.clone(), recorder.clone(), config.dispatch.clone());
        if let Some(bridge_config) = &config.bridge {
            let bridge = AnalyticsBridge::from_config(bridge_config);
            if bridge.is_configured() {
                dispatcher = dispatcher.with_bridge(Arc::new(bridge));
            } else {
                warn!("analytics bridge has no sink credentials, not attached");
            }
        }

        info!(
            telemetry = recorder.is_enabled(),
            fallback = config.dispatch.enable_fallback,
            workers = config.dispatch.worker_threads,
            "infergate started"
        );

        Self {
            workers: WorkerPool::new(config.dispatch.worker_threads),
            registry,
            dispatcher: Arc::new(dispatcher),
            recorder,
            aggregation,
            alerting,
            telemetry_store: telemetry,
            config,
        }
    }

    /// Everything backed by one [`InMemoryStore`].
    pub fn in_memory(config: InfergateConfig) -> Self {
        let store = InMemoryStore::shared();
        Self::start(config, store.clone(), store)
    }

    /// Backed by SQLite at `config.telemetry.database_url`, with the pool
    /// bounds from the telemetry config.
    #[cfg(feature = "persistence-sqlite")]
    pub async fn connect(config: InfergateConfig) -> infergate_kernel::TelemetryResult<Self> {
        use crate::persistence::{PoolSettings, SqliteStore};

        let t = &config.telemetry;
        let store = Arc::new(
            SqliteStore::connect_with_options(
                &t.database_url,
                PoolSettings {
                    min_connections: t.min_connections,
                    max_connections: t.max_connections,
                    command_timeout: t.command_timeout(),
                },
            )
            .await?,
        );
        Ok(Self::start(config, store.clone(), store))
    }

    /// Probe every registered model and record one health-check row each.
    pub async fn run_health_checks(&self) -> BTreeMap<String, HealthStatus> {
        let report = self.registry.health_check_all().await;
        for (name, status) in &report {
            let provider = self
                .registry
                .get(name)
                .map(|m| m.provider().to_string())
                .unwrap_or_else(|| name.clone());
            let mut record = HealthCheckRecord::new(name, provider, status.as_str());
            if let HealthStatus::Degraded(reason) | HealthStatus::Unhealthy(reason) = status {
                record.details = Some(json!({ "reason": reason }));
            }
            self.recorder.record_health_check(record);
        }
        report
    }

    /// Drain queued telemetry and stop the recorder.
    pub async fn shutdown(&self) {
        self.recorder.shutdown().await;
        info!("infergate stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;

    #[tokio::test]
    async fn wires_components_from_config() {
        let mut config = InfergateConfig::default();
        config.dispatch.worker_threads = 3;
        config.bridge = Some(BridgeConfig {
            measurement_id: Some("G-TEST".into()),
            api_secret: Some("secret".into()),
            ..BridgeConfig::default()
        });
        let app = Infergate::in_memory(config);
        assert!(app.recorder.is_enabled());
        assert_eq!(app.workers.size(), 3);
        assert!(app.registry.is_empty());
        assert!(app.dispatcher.has_bridge());
        app.shutdown().await;
    }

    #[tokio::test]
    async fn bridge_without_credentials_is_not_attached() {
        let mut config = InfergateConfig::default();
        config.bridge = Some(BridgeConfig {
            catalog_path: Some("alert_rules.json".into()),
            ..BridgeConfig::default()
        });
        let app = Infergate::in_memory(config);
        assert!(!app.dispatcher.has_bridge());
    }

    #[tokio::test]
    async fn disabled_telemetry() {
        let mut config = InfergateConfig::default();
        config.telemetry.enabled = false;
        let app = Infergate::in_memory(config);
        assert!(!app.recorder.is_enabled());
    }
}
