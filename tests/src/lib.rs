//! Infergate testing utilities
//!
//! Scripted models and a store that always fails, for exercising dispatch,
//! fallback and telemetry suppression without real models or databases.

pub mod model;
pub mod store;

pub use model::{MockModel, Outcome};
pub use store::FailingStore;
