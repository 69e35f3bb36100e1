//! In-memory backend, for tests and single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use infergate_kernel::TelemetryResult;
use infergate_kernel::alert::{Alert, AlertStatus, AlertStore};
use infergate_kernel::telemetry::{
    ErrorRecord, HealthCheckRecord, PredictionRecord, RecordFilter, TelemetryStore,
    ThroughputRecord,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Vectors of records plus an alert map, each behind its own lock.
#[derive(Default)]
pub struct InMemoryStore {
    predictions: RwLock<Vec<PredictionRecord>>,
    errors: RwLock<Vec<ErrorRecord>>,
    health_checks: RwLock<Vec<HealthCheckRecord>>,
    throughput: RwLock<Vec<ThroughputRecord>>,
    alerts: RwLock<HashMap<Uuid, Alert>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn newest_first<T>(mut rows: Vec<T>, at: impl Fn(&T) -> DateTime<Utc>, limit: Option<usize>) -> Vec<T> {
    rows.sort_by_key(|r| std::cmp::Reverse(at(r)));
    if let Some(limit) = limit {
        rows.truncate(limit);
    }
    rows
}

#[async_trait]
impl TelemetryStore for InMemoryStore {
    async fn append_prediction(&self, record: &PredictionRecord) -> TelemetryResult<()> {
        self.predictions.write().await.push(record.clone());
        Ok(())
    }

    async fn append_error(&self, record: &ErrorRecord) -> TelemetryResult<()> {
        self.errors.write().await.push(record.clone());
        Ok(())
    }

    async fn append_health_check(&self, record: &HealthCheckRecord) -> TelemetryResult<()> {
        self.health_checks.write().await.push(record.clone());
        Ok(())
    }

    async fn append_throughput(&self, record: &ThroughputRecord) -> TelemetryResult<()> {
        self.throughput.write().await.push(record.clone());
        Ok(())
    }

    async fn scan_predictions(
        &self,
        filter: &RecordFilter,
    ) -> TelemetryResult<Vec<PredictionRecord>> {
        let mut rows: Vec<_> = self
            .predictions
            .read()
            .await
            .iter()
            .filter(|r| filter.matches(&r.model_name, &r.provider, r.created_at))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn scan_errors(&self, filter: &RecordFilter) -> TelemetryResult<Vec<ErrorRecord>> {
        let rows: Vec<_> = self
            .errors
            .read()
            .await
            .iter()
            .filter(|r| filter.matches(&r.model_name, &r.provider, r.created_at))
            .cloned()
            .collect();
        Ok(newest_first(rows, |r| r.created_at, filter.limit))
    }

    async fn scan_health_checks(
        &self,
        filter: &RecordFilter,
    ) -> TelemetryResult<Vec<HealthCheckRecord>> {
        let rows: Vec<_> = self
            .health_checks
            .read()
            .await
            .iter()
            .filter(|r| filter.matches(&r.model_name, &r.provider, r.checked_at))
            .cloned()
            .collect();
        Ok(newest_first(rows, |r| r.checked_at, filter.limit))
    }

    async fn scan_throughput(
        &self,
        filter: &RecordFilter,
    ) -> TelemetryResult<Vec<ThroughputRecord>> {
        let rows: Vec<_> = self
            .throughput
            .read()
            .await
            .iter()
            .filter(|r| filter.matches(&r.model_name, &r.provider, r.recorded_at))
            .cloned()
            .collect();
        Ok(newest_first(rows, |r| r.recorded_at, filter.limit))
    }

    async fn count_predictions(&self, filter: &RecordFilter) -> TelemetryResult<u64> {
        Ok(self
            .predictions
            .read()
            .await
            .iter()
            .filter(|r| filter.matches(&r.model_name, &r.provider, r.created_at))
            .count() as u64)
    }

    async fn count_errors(&self, filter: &RecordFilter) -> TelemetryResult<u64> {
        Ok(self
            .errors
            .read()
            .await
            .iter()
            .filter(|r| filter.matches(&r.model_name, &r.provider, r.created_at))
            .count() as u64)
    }

    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> TelemetryResult<u64> {
        let mut removed = 0;
        {
            let mut rows = self.predictions.write().await;
            let before = rows.len();
            rows.retain(|r| r.created_at >= cutoff);
            removed += before - rows.len();
        }
        {
            let mut rows = self.errors.write().await;
            let before = rows.len();
            rows.retain(|r| r.created_at >= cutoff);
            removed += before - rows.len();
        }
        {
            let mut rows = self.health_checks.write().await;
            let before = rows.len();
            rows.retain(|r| r.checked_at >= cutoff);
            removed += before - rows.len();
        }
        {
            let mut rows = self.throughput.write().await;
            let before = rows.len();
            rows.retain(|r| r.recorded_at >= cutoff);
            removed += before - rows.len();
        }
        Ok(removed as u64)
    }
}

#[async_trait]
impl AlertStore for InMemoryStore {
    async fn insert_alert(&self, alert: &Alert) -> TelemetryResult<()> {
        self.alerts.write().await.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn get_alert(&self, id: Uuid) -> TelemetryResult<Option<Alert>> {
        Ok(self.alerts.read().await.get(&id).cloned())
    }

    async fn update_alert(&self, alert: &Alert) -> TelemetryResult<bool> {
        let mut alerts = self.alerts.write().await;
        match alerts.get_mut(&alert.id) {
            Some(slot) => {
                *slot = alert.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_active_alert(
        &self,
        model_name: Option<&str>,
        alert_type: &str,
    ) -> TelemetryResult<Option<Alert>> {
        Ok(self
            .alerts
            .read()
            .await
            .values()
            .find(|a| {
                a.is_active() && a.alert_type == alert_type && a.model_name.as_deref() == model_name
            })
            .cloned())
    }

    async fn list_alerts(&self, status: AlertStatus) -> TelemetryResult<Vec<Alert>> {
        Ok(self
            .alerts
            .read()
            .await
            .values()
            .filter(|a| a.status == status)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use infergate_kernel::alert::{AlertSeverity, ERROR_RATE_HIGH};

    #[tokio::test]
    async fn scans_respect_window_and_order() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        for (i, age) in [3, 1, 30].into_iter().enumerate() {
            store
                .append_prediction(
                    &PredictionRecord::new("m", "p", "/predict", format!("l{i}"), 10.0)
                        .at(now - Duration::hours(age)),
                )
                .await
                .unwrap();
        }
        let filter = RecordFilter::new().since(now - Duration::hours(24));
        let rows = store.scan_predictions(&filter).await.unwrap();
        let labels: Vec<_> = rows.iter().map(|r| r.prediction.as_str()).collect();
        assert_eq!(labels, vec!["l0", "l1"]);
        assert_eq!(store.count_predictions(&filter).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn errors_newest_first_with_limit() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        for age in [5, 1, 3] {
            store
                .append_error(
                    &ErrorRecord::new("m", "p", "InferenceError")
                        .with_message(format!("{age}"))
                        .at(now - Duration::minutes(age)),
                )
                .await
                .unwrap();
        }
        let rows = store
            .scan_errors(&RecordFilter::new().limit(2))
            .await
            .unwrap();
        let msgs: Vec<_> = rows.iter().filter_map(|r| r.message.as_deref()).collect();
        assert_eq!(msgs, vec!["1", "3"]);
        let groups = store
            .error_counts_by_group(&RecordFilter::new().limit(1))
            .await
            .unwrap();
        assert_eq!(groups.values().sum::<u64>(), 3);
    }

    #[tokio::test]
    async fn cleanup_removes_old_rows() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .append_prediction(
                &PredictionRecord::new("m", "p", "/", "x", 1.0).at(now - Duration::days(10)),
            )
            .await
            .unwrap();
        store
            .append_prediction(&PredictionRecord::new("m", "p", "/", "y", 1.0))
            .await
            .unwrap();
        let removed = store.cleanup_before(now - Duration::days(7)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count_predictions(&RecordFilter::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn alert_lookup_by_model_and_type() {
        let store = InMemoryStore::new();
        let alert =
            Alert::new(ERROR_RATE_HIGH, AlertSeverity::Warning, "high").for_model("m", "p");
        store.insert_alert(&alert).await.unwrap();
        assert!(
            store
                .find_active_alert(Some("m"), ERROR_RATE_HIGH)
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            store
                .find_active_alert(Some("other"), ERROR_RATE_HIGH)
                .await
                .unwrap()
                .is_none()
        );

        let mut resolved = alert.clone();
        resolved.resolve(Utc::now());
        assert!(store.update_alert(&resolved).await.unwrap());
        assert_eq!(store.count_active_alerts().await.unwrap(), 0);
        assert!(!store.update_alert(&Alert::new("x", AlertSeverity::Info, "y")).await.unwrap());
    }
}
