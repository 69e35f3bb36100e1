//! Windowed aggregation over the telemetry store.
//!
//! Every query has a fallible `try_*` form and an infallible form that logs
//! store failures and returns an empty result, which is what the monitoring
//! surface calls.

use chrono::Utc;
use infergate_kernel::TelemetryResult;
use infergate_kernel::alert::DynAlertStore;
use infergate_kernel::stats::{
    LatencyDistribution, LatencyPercentiles, MetricsSummary, ModelStats, Window, rate,
};
use infergate_kernel::telemetry::{
    DynTelemetryStore, ErrorRecord, GroupKey, PredictionRecord, RecordFilter,
};
use std::collections::BTreeMap;
use tracing::error;

pub const DEFAULT_ERROR_LIMIT: usize = 50;
pub const MAX_ERROR_LIMIT: usize = 500;

/// Clamp a requested error-list size to `1..=500`, defaulting to 50.
pub fn clamp_error_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_ERROR_LIMIT)
        .clamp(1, MAX_ERROR_LIMIT)
}

fn group_stats(
    key: &GroupKey,
    records: &[PredictionRecord],
    error_count: u64,
    window: Window,
) -> ModelStats {
    let total = records.len() as u64;
    let latencies: Vec<f64> = records.iter().map(|r| r.latency_ms).collect();
    let dist = LatencyDistribution::from_samples(&latencies);

    let confidences: Vec<f64> = records.iter().filter_map(|r| r.confidence).collect();
    let avg_confidence = (!confidences.is_empty())
        .then(|| confidences.iter().sum::<f64>() / confidences.len() as f64);

    let fallback_count = records.iter().filter(|r| r.fallback_used).count() as u64;
    let mut label_counts = BTreeMap::new();
    for record in records {
        *label_counts.entry(record.prediction.clone()).or_insert(0) += 1;
    }

    ModelStats {
        model_name: key.model_name.clone(),
        provider: key.provider.clone(),
        total_requests: total,
        avg_latency_ms: dist.avg_ms,
        p50_latency_ms: dist.p50_ms,
        p95_latency_ms: dist.p95_ms,
        p99_latency_ms: dist.p99_ms,
        min_latency_ms: dist.min_ms,
        max_latency_ms: dist.max_ms,
        avg_confidence,
        fallback_count,
        fallback_rate: rate(fallback_count, total),
        error_count,
        error_rate: rate(error_count, total),
        label_counts,
        period: window.label(),
    }
}

pub struct AggregationEngine {
    telemetry: DynTelemetryStore,
    alerts: DynAlertStore,
}

impl AggregationEngine {
    pub fn new(telemetry: DynTelemetryStore, alerts: DynAlertStore) -> Self {
        Self { telemetry, alerts }
    }

    fn window_filter(model_name: Option<&str>, window: Window) -> RecordFilter {
        let (start, end) = window.bounds(Utc::now());
        RecordFilter::new()
            .model_opt(model_name)
            .since(start)
            .until(end)
    }

    /// Per `(model_name, provider)` stats over the window, busiest first.
    ///
    /// Groups come from prediction records; error counts are joined per
    /// group. Rates are relative to the group's prediction count.
    pub async fn try_model_stats(
        &self,
        model_name: Option<&str>,
        window: Window,
    ) -> TelemetryResult<Vec<ModelStats>> {
        let filter = Self::window_filter(model_name, window);
        let groups = self.telemetry.group_predictions(&filter).await?;
        let errors = self.telemetry.error_counts_by_group(&filter).await?;

        let mut stats: Vec<ModelStats> = groups
            .iter()
            .map(|(key, records)| {
                let error_count = errors.get(key).copied().unwrap_or(0);
                group_stats(key, records, error_count, window)
            })
            .collect();
        stats.sort_by(|a, b| {
            b.total_requests
                .cmp(&a.total_requests)
                .then_with(|| a.model_name.cmp(&b.model_name))
                .then_with(|| a.provider.cmp(&b.provider))
        });
        Ok(stats)
    }

    pub async fn model_stats(&self, model_name: Option<&str>, window: Window) -> Vec<ModelStats> {
        self.try_model_stats(model_name, window)
            .await
            .unwrap_or_else(|e| {
                error!(model = ?model_name, error = %e, "model stats query failed");
                Vec::new()
            })
    }

    /// Latency percentiles for one model, or `None` when it has no
    /// prediction in the window. A model served by several providers
    /// reports its busiest provider.
    pub async fn try_latency_percentiles(
        &self,
        model_name: &str,
        window: Window,
    ) -> TelemetryResult<Option<LatencyPercentiles>> {
        let now = Utc::now();
        let (start, end) = window.bounds(now);
        let filter = RecordFilter::new().model(model_name).since(start).until(end);

        let groups = self.telemetry.group_predictions(&filter).await?;
        let Some((key, records)) = groups
            .into_iter()
            .max_by(|a, b| a.1.len().cmp(&b.1.len()).then_with(|| b.0.cmp(&a.0)))
        else {
            return Ok(None);
        };

        let error_count = self
            .telemetry
            .count_errors(&filter.clone().provider(&key.provider))
            .await?;
        let latencies: Vec<f64> = records.iter().map(|r| r.latency_ms).collect();
        let dist = LatencyDistribution::from_samples(&latencies);

        Ok(Some(LatencyPercentiles {
            model_name: key.model_name,
            provider: key.provider,
            period_start: start,
            period_end: end,
            p50_ms: dist.p50_ms,
            p95_ms: dist.p95_ms,
            p99_ms: dist.p99_ms,
            avg_ms: Some(dist.avg_ms),
            min_ms: dist.min_ms,
            max_ms: dist.max_ms,
            total_requests: records.len() as u64,
            error_count,
            fallback_count: records.iter().filter(|r| r.fallback_used).count() as u64,
        }))
    }

    pub async fn latency_percentiles(
        &self,
        model_name: &str,
        window: Window,
    ) -> Option<LatencyPercentiles> {
        self.try_latency_percentiles(model_name, window)
            .await
            .unwrap_or_else(|e| {
                error!(model = %model_name, error = %e, "latency percentile query failed");
                None
            })
    }

    /// Most recent error records, newest first. `limit` is clamped to `1..=500`.
    pub async fn try_recent_errors(
        &self,
        model_name: Option<&str>,
        limit: Option<usize>,
    ) -> TelemetryResult<Vec<ErrorRecord>> {
        let filter = RecordFilter::new()
            .model_opt(model_name)
            .limit(clamp_error_limit(limit));
        self.telemetry.scan_errors(&filter).await
    }

    pub async fn recent_errors(
        &self,
        model_name: Option<&str>,
        limit: Option<usize>,
    ) -> Vec<ErrorRecord> {
        self.try_recent_errors(model_name, limit)
            .await
            .unwrap_or_else(|e| {
                error!(model = ?model_name, error = %e, "recent errors query failed");
                Vec::new()
            })
    }

    pub async fn try_summary(&self, window: Window) -> TelemetryResult<MetricsSummary> {
        let now = Utc::now();
        let (start, end) = window.bounds(now);
        let filter = RecordFilter::new().since(start).until(end);

        let total_predictions = self.telemetry.count_predictions(&filter).await?;
        let total_errors = self.telemetry.count_errors(&filter).await?;
        let active_alerts = self.alerts.count_active_alerts().await?;
        let models = self.try_model_stats(None, window).await?;

        Ok(MetricsSummary {
            total_predictions,
            total_errors,
            active_alerts,
            models,
            period_start: start,
            period_end: end,
        })
    }

    /// Summary over the window; all zeros when the store fails.
    pub async fn summary(&self, window: Window) -> MetricsSummary {
        match self.try_summary(window).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %e, "summary query failed");
                let now = Utc::now();
                MetricsSummary {
                    total_predictions: 0,
                    total_errors: 0,
                    active_alerts: 0,
                    models: Vec::new(),
                    period_start: now,
                    period_end: now,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryStore;
    use chrono::Duration;
    use infergate_kernel::telemetry::TelemetryStore;
    use std::sync::Arc;

    fn engine(store: &Arc<InMemoryStore>) -> AggregationEngine {
        AggregationEngine::new(store.clone(), store.clone())
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[tokio::test]
    async fn linear_percentiles_over_hundred_samples() {
        let store = InMemoryStore::shared();
        for ms in 1..=100 {
            store
                .append_prediction(&PredictionRecord::new("m", "p", "/", "NORMAL", f64::from(ms)))
                .await
                .unwrap();
        }
        let agg = engine(&store);
        let stats = agg.model_stats(Some("m"), Window::default()).await;
        assert_eq!(stats.len(), 1);
        let s = &stats[0];
        assert_eq!(s.total_requests, 100);
        assert!(close(s.p50_latency_ms.unwrap(), 50.5));
        assert!(close(s.p95_latency_ms.unwrap(), 95.05));
        assert!(close(s.p99_latency_ms.unwrap(), 99.01));
        assert_eq!(s.min_latency_ms, Some(1.0));
        assert_eq!(s.max_latency_ms, Some(100.0));
        assert!(close(s.avg_latency_ms, 50.5));

        let lat = agg.latency_percentiles("m", Window::default()).await.unwrap();
        assert!(close(lat.p95_ms.unwrap(), 95.05));
        assert_eq!(lat.total_requests, 100);
    }

    #[tokio::test]
    async fn empty_window_has_zero_rates_and_no_latency() {
        let store = InMemoryStore::shared();
        let agg = engine(&store);
        assert!(agg.model_stats(None, Window::hours(1)).await.is_empty());
        assert!(agg.latency_percentiles("ghost", Window::default()).await.is_none());

        let summary = agg.summary(Window::default()).await;
        assert_eq!(summary.total_predictions, 0);
        assert_eq!(summary.total_errors, 0);
        assert!(summary.models.is_empty());
        assert_eq!(rate(0, 0), 0.0);
    }

    #[tokio::test]
    async fn stats_join_errors_and_count_labels() {
        let store = InMemoryStore::shared();
        for (label, fallback, conf) in [
            ("DÉPRESSION", false, 0.9),
            ("NORMAL", true, 0.7),
            ("NORMAL", false, 0.8),
            ("ERREUR", false, 0.0),
        ] {
            let mut rec = PredictionRecord::new("m", "p", "/", label, 10.0).with_fallback(fallback);
            rec.confidence = Some(conf);
            store.append_prediction(&rec).await.unwrap();
        }
        store
            .append_error(&ErrorRecord::new("m", "p", "Timeout"))
            .await
            .unwrap();
        store
            .append_error(&ErrorRecord::new("other", "p", "Timeout"))
            .await
            .unwrap();

        let stats = engine(&store).model_stats(Some("m"), Window::default()).await;
        let s = &stats[0];
        assert_eq!(s.total_requests, 4);
        assert_eq!(s.fallback_count, 1);
        assert!(close(s.fallback_rate, 25.0));
        assert_eq!(s.error_count, 1);
        assert!(close(s.error_rate, 25.0));
        assert_eq!(s.label_count("NORMAL"), 2);
        assert_eq!(s.label_count("ERREUR"), 1);
        assert!(close(s.avg_confidence.unwrap(), 0.6));
        assert_eq!(s.period, "24h");
    }

    #[tokio::test]
    async fn window_excludes_old_records() {
        let store = InMemoryStore::shared();
        let old = Utc::now() - Duration::hours(3);
        store
            .append_prediction(&PredictionRecord::new("m", "p", "/", "NORMAL", 1.0).at(old))
            .await
            .unwrap();
        store
            .append_prediction(&PredictionRecord::new("m", "p", "/", "NORMAL", 2.0))
            .await
            .unwrap();
        let agg = engine(&store);
        assert_eq!(agg.model_stats(None, Window::hours(1)).await[0].total_requests, 1);
        assert_eq!(agg.model_stats(None, Window::hours(6)).await[0].total_requests, 2);
    }

    #[tokio::test]
    async fn recent_errors_clamped_and_filtered() {
        let store = InMemoryStore::shared();
        for i in 0..5 {
            store
                .append_error(
                    &ErrorRecord::new(if i % 2 == 0 { "a" } else { "b" }, "p", "X")
                        .at(Utc::now() - Duration::seconds(10 - i)),
                )
                .await
                .unwrap();
        }
        let agg = engine(&store);
        assert_eq!(agg.recent_errors(None, Some(0)).await.len(), 1);
        assert_eq!(agg.recent_errors(None, None).await.len(), 5);
        let only_a = agg.recent_errors(Some("a"), Some(10)).await;
        assert_eq!(only_a.len(), 3);
        assert!(only_a[0].created_at >= only_a[1].created_at);
        assert_eq!(clamp_error_limit(Some(10_000)), 500);
    }

    #[tokio::test]
    async fn summary_sorts_busiest_first() {
        let store = InMemoryStore::shared();
        for (model, n) in [("quiet", 1), ("busy", 3)] {
            for _ in 0..n {
                store
                    .append_prediction(&PredictionRecord::new(model, model, "/", "NORMAL", 1.0))
                    .await
                    .unwrap();
            }
        }
        let summary = engine(&store).summary(Window::default()).await;
        assert_eq!(summary.total_predictions, 4);
        assert_eq!(summary.models[0].model_name, "busy");
        assert_eq!(summary.active_alerts, 0);
    }
}
