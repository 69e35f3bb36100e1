//! Destinations for enriched metric events.

use super::{BridgeError, MetricEvent};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MEASUREMENT_ENDPOINT: &str = "https://www.google-analytics.com/mp/collect";

#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn send(&self, event: &MetricEvent) -> Result<(), BridgeError>;
}

/// Measurement-protocol sink: one POST per event, `204 No Content` on
/// success.
pub struct HttpAnalyticsSink {
    client: Client,
    endpoint: String,
    measurement_id: String,
    api_secret: String,
    timeout: Duration,
}

impl HttpAnalyticsSink {
    pub fn new(measurement_id: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: DEFAULT_MEASUREMENT_ENDPOINT.to_string(),
            measurement_id: measurement_id.into(),
            api_secret: api_secret.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AnalyticsSink for HttpAnalyticsSink {
    async fn send(&self, event: &MetricEvent) -> Result<(), BridgeError> {
        let body = json!({
            "client_id": event.client_id,
            "events": [{
                "name": event.event_name,
                "params": event.params,
            }]
        });

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[
                ("measurement_id", self.measurement_id.as_str()),
                ("api_secret", self.api_secret.as_str()),
            ])
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::NO_CONTENT {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        debug!(event = %event.event_name, "metric event forwarded");
        Ok(())
    }
}
