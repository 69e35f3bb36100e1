//! Windowed statistics derived from telemetry records.
//!
//! Nothing here is stored: every value is recomputed on demand from the
//! records inside a trailing [`Window`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_WINDOW_HOURS: u32 = 24;
pub const MIN_WINDOW_HOURS: u32 = 1;
pub const MAX_WINDOW_HOURS: u32 = 168;

/// Trailing time window in hours, clamped to `1..=168`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    hours: u32,
}

impl Window {
    pub fn hours(hours: u32) -> Self {
        Self {
            hours: hours.clamp(MIN_WINDOW_HOURS, MAX_WINDOW_HOURS),
        }
    }

    pub fn get(&self) -> u32 {
        self.hours
    }

    /// `(start, end)` of the window ending at `now`.
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - Duration::hours(i64::from(self.hours)), now)
    }

    /// Label such as `24h`.
    pub fn label(&self) -> String {
        format!("{}h", self.hours)
    }
}

impl Default for Window {
    fn default() -> Self {
        Self::hours(DEFAULT_WINDOW_HOURS)
    }
}

impl From<u32> for Window {
    fn from(hours: u32) -> Self {
        Self::hours(hours)
    }
}

/// Continuous percentile with linear interpolation over a sorted sample.
///
/// `q` is in `[0, 1]`. The rank is `q * (n - 1)` and the value is
/// interpolated between its neighbours, so `{1..=100}` yields
/// `p50 = 50.5`, `p95 = 95.05`, `p99 = 99.01`. Returns `None` for an empty
/// sample.
pub fn percentile_cont(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// `count / total * 100`, or 0 when `total` is 0.
pub fn rate(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

/// Latency distribution of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatencyDistribution {
    pub avg_ms: f64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

impl LatencyDistribution {
    /// Compute from an unsorted latency sample.
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);
        let sum: f64 = sorted.iter().sum();
        Self {
            avg_ms: sum / sorted.len() as f64,
            p50_ms: percentile_cont(&sorted, 0.50),
            p95_ms: percentile_cont(&sorted, 0.95),
            p99_ms: percentile_cont(&sorted, 0.99),
            min_ms: sorted.first().copied(),
            max_ms: sorted.last().copied(),
        }
    }
}

/// Per `(model_name, provider)` aggregate over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    pub model_name: String,
    pub provider: String,
    pub total_requests: u64,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: Option<f64>,
    pub p95_latency_ms: Option<f64>,
    pub p99_latency_ms: Option<f64>,
    pub min_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub avg_confidence: Option<f64>,
    pub fallback_count: u64,
    pub fallback_rate: f64,
    pub error_count: u64,
    pub error_rate: f64,
    /// Predictions per label.
    pub label_counts: BTreeMap<String, u64>,
    pub period: String,
}

impl ModelStats {
    pub fn label_count(&self, label: &str) -> u64 {
        self.label_counts.get(label).copied().unwrap_or(0)
    }
}

/// Latency percentiles of a single model over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub model_name: String,
    pub provider: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub avg_ms: Option<f64>,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub total_requests: u64,
    pub error_count: u64,
    pub fallback_count: u64,
}

/// Global overview over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_predictions: u64,
    pub total_errors: u64,
    pub active_alerts: u64,
    pub models: Vec<ModelStats>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}
