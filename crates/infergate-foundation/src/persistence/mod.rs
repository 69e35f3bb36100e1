//! Telemetry and alert storage backends.
//!
//! Both backends implement [`TelemetryStore`] and [`AlertStore`] on a single
//! type, so one `Arc` can be coerced into both handles:
//!
//! ```rust,ignore
//! use infergate_foundation::persistence::InMemoryStore;
//!
//! let store = InMemoryStore::shared();
//! let telemetry: DynTelemetryStore = store.clone();
//! let alerts: DynAlertStore = store;
//! ```
//!
//! The SQLite backend is available with the `persistence-sqlite` feature.

mod memory;

pub use infergate_kernel::alert::{AlertStore, DynAlertStore};
pub use infergate_kernel::telemetry::{DynTelemetryStore, TelemetryStore};
pub use memory::*;

#[cfg(feature = "persistence-sqlite")]
mod sqlite;
#[cfg(feature = "persistence-sqlite")]
pub use sqlite::*;
