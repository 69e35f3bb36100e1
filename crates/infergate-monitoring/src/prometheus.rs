//! Prometheus text exposition.
//!
//! Windowed values are recomputed on every scrape and can go down, so they
//! are exposed as gauges. Only the recorder's process counters are exposed
//! with the `counter` type.

use infergate_foundation::telemetry::CounterSnapshot;
use infergate_kernel::stats::{MetricsSummary, ModelStats};
use std::fmt::Write as _;

pub fn render_exposition(summary: &MetricsSummary, counters: &CounterSnapshot) -> String {
    let mut out = String::with_capacity(4 * 1024);
    render_window_metrics(&mut out, summary);
    render_model_metrics(&mut out, &summary.models);
    render_counters(&mut out, counters);
    out
}

fn render_window_metrics(out: &mut String, summary: &MetricsSummary) {
    for (name, help, value) in [
        (
            "infergate_window_predictions",
            "Predictions recorded in the trailing window",
            summary.total_predictions,
        ),
        (
            "infergate_window_errors",
            "Errors recorded in the trailing window",
            summary.total_errors,
        ),
        (
            "infergate_window_alerts_active",
            "Currently active alerts",
            summary.active_alerts,
        ),
    ] {
        write_metric_header(out, name, help, "gauge");
        append_line(out, name, &[], value as f64);
    }
}

fn render_model_metrics(out: &mut String, models: &[ModelStats]) {
    type Extract = fn(&ModelStats) -> Option<f64>;
    let families: [(&str, &str, Extract); 6] = [
        (
            "infergate_model_requests",
            "Predictions per model in the trailing window",
            |m| Some(m.total_requests as f64),
        ),
        (
            "infergate_model_latency_avg_ms",
            "Average latency per model",
            |m| Some(m.avg_latency_ms),
        ),
        (
            "infergate_model_latency_p50_ms",
            "Median latency per model",
            |m| m.p50_latency_ms,
        ),
        (
            "infergate_model_latency_p95_ms",
            "95th percentile latency per model",
            |m| m.p95_latency_ms,
        ),
        (
            "infergate_model_error_rate",
            "Error rate per model in percent",
            |m| Some(m.error_rate),
        ),
        (
            "infergate_model_fallback_rate",
            "Fallback rate per model in percent",
            |m| Some(m.fallback_rate),
        ),
    ];

    for (name, help, extract) in families {
        write_metric_header(out, name, help, "gauge");
        for model in models {
            if let Some(value) = extract(model) {
                append_line(out, name, &model_labels(model), value);
            }
        }
    }
}

fn render_counters(out: &mut String, counters: &CounterSnapshot) {
    for (name, help, value) in [
        (
            "infergate_predictions_total",
            "Prediction records accepted since start",
            counters.predictions_total,
        ),
        (
            "infergate_errors_total",
            "Error records accepted since start",
            counters.errors_total,
        ),
        (
            "infergate_fallbacks_total",
            "Predictions served by a fallback since start",
            counters.fallbacks_total,
        ),
        (
            "infergate_telemetry_dropped_total",
            "Telemetry records dropped since start",
            counters.dropped_total,
        ),
    ] {
        write_metric_header(out, name, help, "counter");
        append_line(out, name, &[], value as f64);
    }
}

fn model_labels(model: &ModelStats) -> [(&'static str, &str); 2] {
    [("model", model.model_name.as_str()), ("provider", model.provider.as_str())]
}

fn write_metric_header(out: &mut String, name: &str, help: &str, metric_type: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {metric_type}");
}

fn append_line(out: &mut String, name: &str, labels: &[(&str, &str)], value: f64) {
    if !value.is_finite() {
        return;
    }

    if labels.is_empty() {
        let _ = writeln!(out, "{name} {}", format_float(value));
        return;
    }

    let rendered_labels = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label_value(v)))
        .collect::<Vec<_>>()
        .join(",");
    let _ = writeln!(out, "{name}{{{rendered_labels}}} {}", format_float(value));
}

fn format_float(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.6}")
    }
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('"', "\\\"")
}
