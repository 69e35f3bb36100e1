//! Telemetry records and the store contract.
//!
//! Records are immutable once created and only ever appended. A store must
//! offer time-range scans filtered by `(model_name, provider)`; grouping and
//! quantiles are derived from those scans by default and may be pushed down
//! into the backend by overriding the provided methods.

use crate::error::TelemetryResult;
use crate::model::{Prediction, Severity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// One successful inference attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: Uuid,
    pub model_name: String,
    pub model_version: Option<String>,
    pub provider: String,
    pub endpoint: String,
    pub request_id: Option<String>,
    pub prediction: String,
    pub confidence: Option<f64>,
    pub severity: Option<Severity>,
    pub latency_ms: f64,
    pub fallback_used: bool,
    pub input_length: Option<u64>,
    pub batch_size: u32,
    pub created_at: DateTime<Utc>,
}

impl PredictionRecord {
    pub fn new(
        model_name: impl Into<String>,
        provider: impl Into<String>,
        endpoint: impl Into<String>,
        prediction: impl Into<String>,
        latency_ms: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            model_name: model_name.into(),
            model_version: None,
            provider: provider.into(),
            endpoint: endpoint.into(),
            request_id: None,
            prediction: prediction.into(),
            confidence: None,
            severity: None,
            latency_ms,
            fallback_used: false,
            input_length: None,
            batch_size: 1,
            created_at: Utc::now(),
        }
    }

    /// Copy label, confidence and severity from a model output.
    pub fn with_prediction(mut self, prediction: &Prediction) -> Self {
        self.prediction = prediction.label.clone();
        self.confidence = Some(prediction.confidence);
        self.severity = Some(prediction.severity);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = Some(version.into());
        self
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_fallback(mut self, fallback_used: bool) -> Self {
        self.fallback_used = fallback_used;
        self
    }

    pub fn with_input_length(mut self, len: usize) -> Self {
        self.input_length = Some(len as u64);
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// One inference attempt that raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub model_name: String,
    pub provider: String,
    pub error_type: String,
    pub message: Option<String>,
    pub endpoint: Option<String>,
    pub request_id: Option<String>,
    pub input_length: Option<u64>,
    pub stack_trace: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(
        model_name: impl Into<String>,
        provider: impl Into<String>,
        error_type: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            model_name: model_name.into(),
            provider: provider.into(),
            error_type: error_type.into(),
            message: None,
            endpoint: None,
            request_id: None,
            input_length: None,
            stack_trace: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_input_length(mut self, len: usize) -> Self {
        self.input_length = Some(len as u64);
        self
    }

    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Outcome of a model self-check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckRecord {
    pub id: Uuid,
    pub model_name: String,
    pub provider: String,
    /// `healthy`, `degraded` or `unhealthy`.
    pub status: String,
    pub latency_ms: Option<f64>,
    pub memory_mb: Option<f64>,
    pub details: Option<serde_json::Value>,
    pub checked_at: DateTime<Utc>,
}

impl HealthCheckRecord {
    pub fn new(
        model_name: impl Into<String>,
        provider: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            model_name: model_name.into(),
            provider: provider.into(),
            status: status.into(),
            latency_ms: None,
            memory_mb: None,
            details: None,
            checked_at: Utc::now(),
        }
    }
}

/// Request-rate sample for a model over a short window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputRecord {
    pub id: Uuid,
    pub model_name: String,
    pub provider: String,
    pub requests_per_second: Option<f64>,
    pub requests_per_minute: Option<u64>,
    pub concurrent_requests: Option<u64>,
    pub window_seconds: u32,
    pub recorded_at: DateTime<Utc>,
}

impl ThroughputRecord {
    pub fn new(model_name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            model_name: model_name.into(),
            provider: provider.into(),
            requests_per_second: None,
            requests_per_minute: None,
            concurrent_requests: None,
            window_seconds: 60,
            recorded_at: Utc::now(),
        }
    }
}

/// Any record the recorder accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryRecord {
    Prediction(PredictionRecord),
    Error(ErrorRecord),
    HealthCheck(HealthCheckRecord),
    Throughput(ThroughputRecord),
}

impl TelemetryRecord {
    pub fn model_name(&self) -> &str {
        match self {
            Self::Prediction(r) => &r.model_name,
            Self::Error(r) => &r.model_name,
            Self::HealthCheck(r) => &r.model_name,
            Self::Throughput(r) => &r.model_name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Prediction(_) => "prediction",
            Self::Error(_) => "error",
            Self::HealthCheck(_) => "health_check",
            Self::Throughput(_) => "throughput",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Queries
// ─────────────────────────────────────────────────────────────────────────────

/// Grouping key used by every per-model aggregate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub model_name: String,
    pub provider: String,
}

impl GroupKey {
    pub fn new(model_name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            provider: provider.into(),
        }
    }
}

/// Scan filter. `since` is exclusive, `until` inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub model_name: Option<String>,
    pub provider: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    pub fn model_opt(mut self, model_name: Option<&str>) -> Self {
        self.model_name = model_name.map(str::to_string);
        self
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a row with these attributes falls inside the filter.
    pub fn matches(&self, model_name: &str, provider: &str, at: DateTime<Utc>) -> bool {
        self.model_name.as_deref().is_none_or(|m| m == model_name)
            && self.provider.as_deref().is_none_or(|p| p == provider)
            && self.since.is_none_or(|s| at > s)
            && self.until.is_none_or(|u| at <= u)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store contract
// ─────────────────────────────────────────────────────────────────────────────

/// Append-only telemetry store.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn append_prediction(&self, record: &PredictionRecord) -> TelemetryResult<()>;

    async fn append_error(&self, record: &ErrorRecord) -> TelemetryResult<()>;

    async fn append_health_check(&self, record: &HealthCheckRecord) -> TelemetryResult<()>;

    async fn append_throughput(&self, record: &ThroughputRecord) -> TelemetryResult<()>;

    /// Prediction rows matching the filter, oldest first.
    async fn scan_predictions(&self, filter: &RecordFilter)
    -> TelemetryResult<Vec<PredictionRecord>>;

    /// Error rows matching the filter, newest first, truncated to `limit`.
    async fn scan_errors(&self, filter: &RecordFilter) -> TelemetryResult<Vec<ErrorRecord>>;

    /// Health-check rows matching the filter, newest first.
    async fn scan_health_checks(
        &self,
        filter: &RecordFilter,
    ) -> TelemetryResult<Vec<HealthCheckRecord>>;

    /// Throughput rows matching the filter, newest first.
    async fn scan_throughput(&self, filter: &RecordFilter)
    -> TelemetryResult<Vec<ThroughputRecord>>;

    async fn count_predictions(&self, filter: &RecordFilter) -> TelemetryResult<u64> {
        Ok(self.scan_predictions(filter).await?.len() as u64)
    }

    async fn count_errors(&self, filter: &RecordFilter) -> TelemetryResult<u64> {
        let unbounded = RecordFilter {
            limit: None,
            ..filter.clone()
        };
        Ok(self.scan_errors(&unbounded).await?.len() as u64)
    }

    /// Prediction rows grouped by `(model_name, provider)`.
    async fn group_predictions(
        &self,
        filter: &RecordFilter,
    ) -> TelemetryResult<BTreeMap<GroupKey, Vec<PredictionRecord>>> {
        let mut groups: BTreeMap<GroupKey, Vec<PredictionRecord>> = BTreeMap::new();
        for record in self.scan_predictions(filter).await? {
            groups
                .entry(GroupKey::new(&record.model_name, &record.provider))
                .or_default()
                .push(record);
        }
        Ok(groups)
    }

    /// Error counts grouped by `(model_name, provider)`.
    async fn error_counts_by_group(
        &self,
        filter: &RecordFilter,
    ) -> TelemetryResult<BTreeMap<GroupKey, u64>> {
        let unbounded = RecordFilter {
            limit: None,
            ..filter.clone()
        };
        let mut counts = BTreeMap::new();
        for record in self.scan_errors(&unbounded).await? {
            *counts
                .entry(GroupKey::new(&record.model_name, &record.provider))
                .or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Delete every row created strictly before `cutoff`. Returns the number removed.
    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> TelemetryResult<u64>;

    async fn health_check(&self) -> TelemetryResult<()> {
        Ok(())
    }
}

pub type DynTelemetryStore = Arc<dyn TelemetryStore>;
