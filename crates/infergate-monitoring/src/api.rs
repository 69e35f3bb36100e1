//! Query surface consumed by the HTTP layer.
//!
//! Every method answers even when the store is failing: errors are logged
//! and turned into empty results, as the aggregation engine does.

use crate::prometheus::render_exposition;
use infergate_foundation::telemetry::TelemetryRecorder;
use infergate_foundation::{AggregationEngine, AlertingEngine, Infergate};
use infergate_kernel::alert::Alert;
use infergate_kernel::stats::{LatencyPercentiles, MetricsSummary, ModelStats, Window};
use infergate_kernel::telemetry::{DynTelemetryStore, ErrorRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Window of the summary rendered by [`MetricsApi::render_exposition`].
pub const EXPOSITION_WINDOW_HOURS: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// `"ok"` when the store answers, `"degraded"` otherwise.
    pub status: String,
    pub store_reachable: bool,
    pub telemetry_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct MetricsApi {
    aggregation: Arc<AggregationEngine>,
    alerting: Arc<AlertingEngine>,
    telemetry: DynTelemetryStore,
    recorder: TelemetryRecorder,
}

impl MetricsApi {
    pub fn new(
        aggregation: Arc<AggregationEngine>,
        alerting: Arc<AlertingEngine>,
        telemetry: DynTelemetryStore,
        recorder: TelemetryRecorder,
    ) -> Self {
        Self {
            aggregation,
            alerting,
            telemetry,
            recorder,
        }
    }

    pub fn from_service(service: &Infergate) -> Self {
        Self::new(
            service.aggregation.clone(),
            service.alerting.clone(),
            service.telemetry_store.clone(),
            service.recorder.clone(),
        )
    }

    pub async fn health(&self) -> HealthReport {
        let telemetry_enabled = self.recorder.is_enabled();
        match self.telemetry.health_check().await {
            Ok(()) => HealthReport {
                status: "ok".to_string(),
                store_reachable: true,
                telemetry_enabled,
                error: None,
            },
            Err(e) => {
                error!(error = %e, "telemetry store health check failed");
                HealthReport {
                    status: "degraded".to_string(),
                    store_reachable: false,
                    telemetry_enabled,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// ACTIVE alerts, critical first.
    pub async fn list_active(&self) -> Vec<Alert> {
        self.alerting.active_alerts().await.unwrap_or_else(|e| {
            error!(error = %e, "listing active alerts failed");
            Vec::new()
        })
    }

    /// Resolve an alert. `false` when the id is unknown or the store failed.
    pub async fn resolve(&self, id: Uuid) -> bool {
        match self.alerting.resolve_alert(id).await {
            Ok(true) => {
                info!(alert = %id, "alert resolved");
                true
            }
            Ok(false) => false,
            Err(e) => {
                error!(alert = %id, error = %e, "resolving alert failed");
                false
            }
        }
    }

    pub async fn summary(&self, hours: Option<u32>) -> MetricsSummary {
        self.aggregation.summary(window(hours)).await
    }

    pub async fn model_stats(&self, model_name: Option<&str>, hours: Option<u32>) -> Vec<ModelStats> {
        self.aggregation.model_stats(model_name, window(hours)).await
    }

    pub async fn latency(&self, model_name: &str, hours: Option<u32>) -> Option<LatencyPercentiles> {
        self.aggregation
            .latency_percentiles(model_name, window(hours))
            .await
    }

    pub async fn recent_errors(&self, model_name: Option<&str>, limit: Option<usize>) -> Vec<ErrorRecord> {
        self.aggregation.recent_errors(model_name, limit).await
    }

    /// Text exposition of the last hour plus the process counters.
    pub async fn render_exposition(&self) -> String {
        let summary = self
            .aggregation
            .summary(Window::hours(EXPOSITION_WINDOW_HOURS))
            .await;
        render_exposition(&summary, &self.recorder.counters())
    }
}

fn window(hours: Option<u32>) -> Window {
    hours.map(Window::hours).unwrap_or_default()
}
