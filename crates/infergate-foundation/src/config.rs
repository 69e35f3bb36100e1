//! Typed service configuration.
//!
//! Every field has a serde default, so an empty file (or no file at all)
//! yields a working in-memory setup. Files are read with the kernel loader;
//! `INFERGATE__SECTION__KEY` environment variables override file values.

use infergate_kernel::CapabilityKind;
use infergate_kernel::config::{ConfigError, ConfigResult, from_env, load_with_env};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub const ENV_PREFIX: &str = "INFERGATE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InfergateConfig {
    pub telemetry: TelemetryConfig,
    pub dispatch: DispatchConfig,
    pub alerting: AlertingConfig,
    pub logging: LoggingConfig,
    pub bridge: Option<BridgeConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// When false the recorder accepts and discards every record.
    pub enabled: bool,
    /// Bound of the recorder queue; records beyond it are dropped.
    pub queue_capacity: usize,
    pub database_url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    /// Upper bound on waiting for a pooled store handle.
    pub command_timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 1024,
            database_url: "sqlite::memory:".to_string(),
            min_connections: 2,
            max_connections: 10,
            command_timeout_secs: 60,
        }
    }
}

impl TelemetryConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub enable_fallback: bool,
    /// Well-known model name tried when a capability has no primary binding.
    pub legacy_models: HashMap<CapabilityKind, String>,
    /// Permits of the blocking inference pool.
    pub worker_threads: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enable_fallback: true,
            legacy_models: HashMap::from([(CapabilityKind::Detection, "yansnet-llm".to_string())]),
            worker_threads: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Error-rate threshold in percent.
    pub error_rate_threshold: f64,
    pub window_hours: u32,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold: 10.0,
            window_hours: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// JSON rule catalog; a missing file yields an empty catalog.
    pub catalog_path: Option<String>,
    pub measurement_id: Option<String>,
    pub api_secret: Option<String>,
    /// Measurement endpoint; defaults to the public collector.
    pub endpoint: Option<String>,
}

impl InfergateConfig {
    /// Load `path`, apply environment overrides and validate.
    pub fn load(path: &str) -> ConfigResult<Self> {
        let config: Self = load_with_env(path, ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> ConfigResult<Self> {
        let config: Self = from_env(ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let t = &self.telemetry;
        if t.queue_capacity == 0 {
            return Err(invalid("telemetry.queue_capacity must be positive"));
        }
        if t.min_connections == 0 || t.min_connections > t.max_connections {
            return Err(invalid(format!(
                "telemetry pool bounds invalid: min={} max={}",
                t.min_connections, t.max_connections
            )));
        }
        if t.command_timeout_secs == 0 {
            return Err(invalid("telemetry.command_timeout_secs must be positive"));
        }
        if self.dispatch.worker_threads == 0 {
            return Err(invalid("dispatch.worker_threads must be positive"));
        }
        let a = &self.alerting;
        if !(a.error_rate_threshold > 0.0 && a.error_rate_threshold <= 100.0) {
            return Err(invalid(format!(
                "alerting.error_rate_threshold must be in (0, 100], got {}",
                a.error_rate_threshold
            )));
        }
        if !(1..=168).contains(&a.window_hours) {
            return Err(invalid(format!(
                "alerting.window_hours must be in 1..=168, got {}",
                a.window_hours
            )));
        }
        if let Some(bridge) = &self.bridge {
            if bridge.measurement_id.is_some() != bridge.api_secret.is_some() {
                return Err(invalid(
                    "bridge.measurement_id and bridge.api_secret must be set together",
                ));
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}
