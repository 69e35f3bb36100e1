//! Alert records, their lifecycle and the alert store contract.
//!
//! Lifecycle: `Active -> Acknowledged -> Resolved` or `Active -> Resolved`.
//! Nothing leaves `Resolved`.

use crate::error::TelemetryResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Alert type raised when a model's error rate crosses its threshold.
pub const ERROR_RATE_HIGH: &str = "error_rate_high";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    /// Listing rank: critical first.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::Warning => 1,
            Self::Info => 2,
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown alert severity '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "acknowledged" => Ok(Self::Acknowledged),
            "resolved" => Ok(Self::Resolved),
            other => Err(format!("unknown alert status '{other}'")),
        }
    }
}

/// A persisted threshold breach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub model_name: Option<String>,
    pub provider: Option<String>,
    pub message: String,
    pub threshold_value: Option<f64>,
    pub actual_value: Option<f64>,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// New active alert.
    pub fn new(
        alert_type: impl Into<String>,
        severity: AlertSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_type: alert_type.into(),
            severity,
            model_name: None,
            provider: None,
            message: message.into(),
            threshold_value: None,
            actual_value: None,
            status: AlertStatus::Active,
            created_at: Utc::now(),
            resolved_at: None,
            acknowledged_by: None,
            acknowledged_at: None,
        }
    }

    pub fn for_model(mut self, model_name: impl Into<String>, provider: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self.provider = Some(provider.into());
        self
    }

    pub fn with_values(mut self, threshold: f64, actual: f64) -> Self {
        self.threshold_value = Some(threshold);
        self.actual_value = Some(actual);
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }

    /// Mark resolved at `now`. Resolving again refreshes `resolved_at`.
    pub fn resolve(&mut self, now: DateTime<Utc>) {
        self.status = AlertStatus::Resolved;
        self.resolved_at = Some(now);
    }

    /// Acknowledge an active alert. Returns `false` if the alert is not active.
    pub fn acknowledge(&mut self, by: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.status != AlertStatus::Active {
            return false;
        }
        self.status = AlertStatus::Acknowledged;
        self.acknowledged_by = Some(by.into());
        self.acknowledged_at = Some(now);
        true
    }
}

/// Persistent alert storage.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert_alert(&self, alert: &Alert) -> TelemetryResult<()>;

    async fn get_alert(&self, id: Uuid) -> TelemetryResult<Option<Alert>>;

    /// Replace a stored alert. Returns `false` when no alert has that id.
    async fn update_alert(&self, alert: &Alert) -> TelemetryResult<bool>;

    /// The ACTIVE alert for `(model_name, alert_type)`, if one exists.
    async fn find_active_alert(
        &self,
        model_name: Option<&str>,
        alert_type: &str,
    ) -> TelemetryResult<Option<Alert>>;

    /// Alerts in the given status, in no particular order.
    async fn list_alerts(&self, status: AlertStatus) -> TelemetryResult<Vec<Alert>>;

    async fn count_active_alerts(&self) -> TelemetryResult<u64> {
        Ok(self.list_alerts(AlertStatus::Active).await?.len() as u64)
    }
}

pub type DynAlertStore = Arc<dyn AlertStore>;
