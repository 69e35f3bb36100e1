use async_trait::async_trait;
use chrono::{DateTime, Utc};
use infergate_kernel::TelemetryError;
use infergate_kernel::TelemetryResult;
use infergate_kernel::alert::{Alert, AlertStatus, AlertStore};
use infergate_kernel::telemetry::{
    ErrorRecord, HealthCheckRecord, PredictionRecord, RecordFilter, TelemetryStore,
    ThroughputRecord,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

/// A store whose every operation fails with a connection error.
#[derive(Debug, Default)]
pub struct FailingStore {
    calls: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Operations attempted so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> TelemetryResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TelemetryError::Connection("store unavailable".to_string()))
    }
}

#[async_trait]
impl TelemetryStore for FailingStore {
    async fn append_prediction(&self, _record: &PredictionRecord) -> TelemetryResult<()> {
        self.fail()
    }

    async fn append_error(&self, _record: &ErrorRecord) -> TelemetryResult<()> {
        self.fail()
    }

    async fn append_health_check(&self, _record: &HealthCheckRecord) -> TelemetryResult<()> {
        self.fail()
    }

    async fn append_throughput(&self, _record: &ThroughputRecord) -> TelemetryResult<()> {
        self.fail()
    }

    async fn scan_predictions(
        &self,
        _filter: &RecordFilter,
    ) -> TelemetryResult<Vec<PredictionRecord>> {
        self.fail()
    }

    async fn scan_errors(&self, _filter: &RecordFilter) -> TelemetryResult<Vec<ErrorRecord>> {
        self.fail()
    }

    async fn scan_health_checks(
        &self,
        _filter: &RecordFilter,
    ) -> TelemetryResult<Vec<HealthCheckRecord>> {
        self.fail()
    }

    async fn scan_throughput(
        &self,
        _filter: &RecordFilter,
    ) -> TelemetryResult<Vec<ThroughputRecord>> {
        self.fail()
    }

    async fn cleanup_before(&self, _cutoff: DateTime<Utc>) -> TelemetryResult<u64> {
        self.fail()
    }

    async fn health_check(&self) -> TelemetryResult<()> {
        self.fail()
    }
}

#[async_trait]
impl AlertStore for FailingStore {
    async fn insert_alert(&self, _alert: &Alert) -> TelemetryResult<()> {
        self.fail()
    }

    async fn get_alert(&self, _id: Uuid) -> TelemetryResult<Option<Alert>> {
        self.fail()
    }

    async fn update_alert(&self, _alert: &Alert) -> TelemetryResult<bool> {
        self.fail()
    }

    async fn find_active_alert(
        &self,
        _model_name: Option<&str>,
        _alert_type: &str,
    ) -> TelemetryResult<Option<Alert>> {
        self.fail()
    }

    async fn list_alerts(&self, _status: AlertStatus) -> TelemetryResult<Vec<Alert>> {
        self.fail()
    }
}
