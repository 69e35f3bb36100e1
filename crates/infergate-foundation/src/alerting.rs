//! Threshold alerting.
//!
//! The engine creates alerts (at most one ACTIVE per model and alert type),
//! lists and resolves them. The only built-in rule is the error-rate check
//! run by the telemetry recorder after every persisted error record.
//!
//! De-duplication is a read-then-write check against the alert store. Two
//! concurrent checks can both see "no active alert"; the recorder's single
//! consumer task is what serializes them in practice.

use crate::config::AlertingConfig;
use chrono::{Duration, Utc};
use infergate_kernel::TelemetryResult;
use infergate_kernel::alert::{Alert, AlertSeverity, AlertStatus, DynAlertStore, ERROR_RATE_HIGH};
use infergate_kernel::stats::rate;
use infergate_kernel::telemetry::{DynTelemetryStore, RecordFilter};
use std::cmp::Reverse;
use tracing::{debug, error, warn};
use uuid::Uuid;

pub struct AlertingEngine {
    telemetry: DynTelemetryStore,
    alerts: DynAlertStore,
    config: AlertingConfig,
}

impl AlertingEngine {
    pub fn new(telemetry: DynTelemetryStore, alerts: DynAlertStore, config: AlertingConfig) -> Self {
        Self {
            telemetry,
            alerts,
            config,
        }
    }

    pub fn config(&self) -> &AlertingConfig {
        &self.config
    }

    /// Persist `alert` unless an ACTIVE alert with the same
    /// `(model_name, alert_type)` exists. Returns the new id, or `None` when
    /// de-duplicated.
    pub async fn create_alert(&self, alert: Alert) -> TelemetryResult<Option<Uuid>> {
        if let Some(existing) = self
            .alerts
            .find_active_alert(alert.model_name.as_deref(), &alert.alert_type)
            .await?
        {
            debug!(
                alert_type = %alert.alert_type,
                model = ?alert.model_name,
                existing = %existing.id,
                "active alert already present, not creating another"
            );
            return Ok(None);
        }

        self.alerts.insert_alert(&alert).await?;
        warn!(
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            model = ?alert.model_name,
            message = %alert.message,
            "alert created"
        );
        Ok(Some(alert.id))
    }

    /// Error-rate check with the configured threshold and window.
    ///
    /// Store failures are logged and swallowed.
    pub async fn check_error_rate_alert(&self, model_name: &str, provider: &str) -> Option<Uuid> {
        match self
            .check_error_rate_alert_with(
                model_name,
                provider,
                self.config.error_rate_threshold,
                self.config.window_hours,
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(model = %model_name, error = %e, "error-rate alert check failed");
                None
            }
        }
    }

    /// Count errors and predictions for `(model_name, provider)` in the
    /// trailing window and raise `error_rate_high` when errors over
    /// predictions exceeds `threshold_percent`. No predictions, no alert.
    pub async fn check_error_rate_alert_with(
        &self,
        model_name: &str,
        provider: &str,
        threshold_percent: f64,
        window_hours: u32,
    ) -> TelemetryResult<Option<Uuid>> {
        let now = Utc::now();
        let filter = RecordFilter::new()
            .model(model_name)
            .provider(provider)
            .since(now - Duration::hours(i64::from(window_hours)))
            .until(now);

        let errors = self.telemetry.count_errors(&filter).await?;
        let predictions = self.telemetry.count_predictions(&filter).await?;
        if predictions == 0 {
            return Ok(None);
        }

        let error_rate = rate(errors, predictions);
        if error_rate <= threshold_percent {
            return Ok(None);
        }

        let severity = if error_rate > threshold_percent * 2.0 {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        };
        let alert = Alert::new(
            ERROR_RATE_HIGH,
            severity,
            format!(
                "error rate for {model_name} is {error_rate:.1}% (threshold {threshold_percent}%)"
            ),
        )
        .for_model(model_name, provider)
        .with_values(threshold_percent, error_rate);

        self.create_alert(alert).await
    }

    /// ACTIVE alerts, critical first, newest first within a severity.
    pub async fn active_alerts(&self) -> TelemetryResult<Vec<Alert>> {
        let mut alerts = self.alerts.list_alerts(AlertStatus::Active).await?;
        alerts.sort_by_key(|a| (a.severity.rank(), Reverse(a.created_at)));
        Ok(alerts)
    }

    pub async fn active_count(&self) -> TelemetryResult<u64> {
        self.alerts.count_active_alerts().await
    }

    pub async fn get_alert(&self, id: Uuid) -> TelemetryResult<Option<Alert>> {
        self.alerts.get_alert(id).await
    }

    /// Mark an alert resolved now. Resolving an already resolved alert
    /// succeeds again and refreshes `resolved_at`. Returns `false` for an
    /// unknown id.
    pub async fn resolve_alert(&self, id: Uuid) -> TelemetryResult<bool> {
        let Some(mut alert) = self.alerts.get_alert(id).await? else {
            return Ok(false);
        };
        alert.resolve(Utc::now());
        self.alerts.update_alert(&alert).await
    }
}
