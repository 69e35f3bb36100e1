//! Infergate foundation: the components behind the kernel contracts.
//!
//! A request flows through [`dispatch::Dispatcher`], which resolves models in
//! the [`registry::ModelRegistry`], and reports each attempt to the
//! [`telemetry::TelemetryRecorder`]. The recorder persists records through a
//! [`persistence`] backend and triggers the [`alerting::AlertingEngine`];
//! [`aggregation::AggregationEngine`] reads the same store on demand.
//! [`service::Infergate`] wires all of it from an [`config::InfergateConfig`].

// registry module - models and capability bindings
pub mod registry;

// dispatch module - primary/fallback invocation
pub mod dispatch;

// worker module - blocking inference pool
pub mod worker;

// telemetry module - background recorder
pub mod telemetry;

// persistence module
pub mod persistence;

// aggregation module - windowed statistics
pub mod aggregation;

// alerting module
pub mod alerting;

// bridge module - analytics forwarding
pub mod bridge;

// config module
pub mod config;

// logging module
pub mod logging;

// service module - composition root
pub mod service;

pub use aggregation::AggregationEngine;
pub use alerting::AlertingEngine;
pub use config::InfergateConfig;
pub use dispatch::{BatchRequest, BatchResponse, DispatchRequest, DispatchResponse, Dispatcher};
pub use registry::ModelRegistry;
pub use service::Infergate;
pub use telemetry::TelemetryRecorder;
pub use worker::{BlockingInference, BlockingModel, WorkerPool};
