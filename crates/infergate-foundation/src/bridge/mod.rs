//! Analytics bridge.
//!
//! Receives metric events (usually built from a dispatch result), tags them
//! with the outcome of the rule catalog and forwards them to an external
//! analytics sink on a background task. Forwarding failures are logged and
//! never reach the caller.

mod rules;
mod sink;

pub use rules::*;
pub use sink::*;

use crate::config::BridgeConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

pub const DEFAULT_CLIENT_ID: &str = "system_mon";
pub const DEFAULT_MODEL_NAME: &str = "default";

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BridgeError {
    /// No sink (or no sink credentials) configured.
    #[error("analytics sink not configured")]
    NotConfigured,

    #[error("rule catalog error: {0}")]
    Catalog(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// The sink answered with something other than `204 No Content`.
    #[error("sink rejected event ({status}): {body}")]
    Rejected { status: u16, body: String },
}

pub type BridgeResult<T> = Result<T, BridgeError>;

fn default_model_name() -> String {
    DEFAULT_MODEL_NAME.to_string()
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    pub service: String,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    pub event_name: String,
    pub params: Map<String, Value>,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

impl MetricEvent {
    pub fn new(
        service: impl Into<String>,
        event_name: impl Into<String>,
        params: Map<String, Value>,
    ) -> Self {
        Self {
            service: service.into(),
            model_name: default_model_name(),
            event_name: event_name.into(),
            params,
            client_id: default_client_id(),
        }
    }

    pub fn with_model(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }
}

/// Answer to [`AnalyticsBridge::push`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeAck {
    pub status: String,
    /// Whether any catalog rule matched.
    pub alerts: bool,
}

pub struct AnalyticsBridge {
    catalog: RuleCatalog,
    sink: Option<Arc<dyn AnalyticsSink>>,
}

impl AnalyticsBridge {
    pub fn new(catalog: RuleCatalog, sink: Option<Arc<dyn AnalyticsSink>>) -> Self {
        Self { catalog, sink }
    }

    /// Catalog from `catalog_path` (empty when unset) and an HTTP sink when
    /// both credentials are present.
    pub fn from_config(config: &BridgeConfig) -> Self {
        let catalog = config
            .catalog_path
            .as_deref()
            .map(RuleCatalog::load)
            .unwrap_or_default();
        let sink = match (&config.measurement_id, &config.api_secret) {
            (Some(id), Some(secret)) => {
                let mut http = HttpAnalyticsSink::new(id, secret);
                if let Some(endpoint) = &config.endpoint {
                    http = http.with_endpoint(endpoint);
                }
                Some(Arc::new(http) as Arc<dyn AnalyticsSink>)
            }
            _ => None,
        };
        Self { catalog, sink }
    }

    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    pub fn is_configured(&self) -> bool {
        self.sink.is_some()
    }

    /// Tag `event`, add the `service`/`model_name` dimensions and queue it
    /// for forwarding. Must be called inside a Tokio runtime.
    pub fn push(&self, mut event: MetricEvent) -> BridgeResult<BridgeAck> {
        let Some(sink) = self.sink.clone() else {
            error!(service = %event.service, "analytics sink credentials missing");
            return Err(BridgeError::NotConfigured);
        };

        let tags = self.catalog.evaluate(&event);
        if let Some(tags) = &tags {
            tags.apply(&mut event.params);
        }
        event
            .params
            .insert("service".into(), Value::String(event.service.clone()));
        event
            .params
            .insert("model_name".into(), Value::String(event.model_name.clone()));

        tokio::spawn(async move {
            if let Err(e) = sink.send(&event).await {
                error!(
                    service = %event.service,
                    event = %event.event_name,
                    error = %e,
                    "failed to forward metric event"
                );
            }
        });

        Ok(BridgeAck {
            status: "queued".to_string(),
            alerts: tags.is_some(),
        })
    }
}
