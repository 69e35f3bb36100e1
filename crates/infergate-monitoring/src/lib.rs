//! Infergate monitoring: the alert and statistics query surface and its
//! Prometheus text exposition.

pub mod api;
pub mod prometheus;

pub use api::{HealthReport, MetricsApi};
pub use prometheus::render_exposition;
