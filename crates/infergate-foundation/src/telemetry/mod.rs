//! Telemetry recording.
//!
//! The request path hands records to [`TelemetryRecorder`], which queues
//! them for a background consumer and returns immediately.

mod recorder;

pub use recorder::*;
