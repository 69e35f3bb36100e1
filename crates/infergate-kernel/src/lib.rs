//! Infergate kernel: the contracts shared by every other crate.
//!
//! Model implementations, telemetry stores and alert stores are all
//! expressed as traits here; concrete implementations live in
//! `infergate-foundation`.

// error module
pub mod error;
pub use error::*;

// model contract
pub mod model;
pub use model::*;

// capability kinds and bindings
pub mod capability;
pub use capability::*;

// telemetry records and store contract
pub mod telemetry;

// alert lifecycle and store contract
pub mod alert;

// windowed statistics
pub mod stats;

#[cfg(feature = "config")]
pub mod config;
