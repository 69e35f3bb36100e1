//! Model contract.
//!
//! Every model family (text classifier, image classifier, generator,
//! recommender) implements [`InferenceModel`]. The orchestration layer never
//! looks inside a model: it only calls `predict`, `batch_predict` and
//! `health_check` through this trait.

use crate::error::ModelResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Label some implementations return instead of raising on failure.
///
/// A prediction carrying this label is still a successful prediction as far
/// as telemetry is concerned.
pub const SENTINEL_ERROR_LABEL: &str = "ERREUR";

// ─────────────────────────────────────────────────────────────────────────────
// Severity
// ─────────────────────────────────────────────────────────────────────────────

/// Severity attached to a prediction.
///
/// Serialized with the labels the response envelope exposes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    #[default]
    #[serde(rename = "Aucune")]
    None,
    #[serde(rename = "Faible")]
    Low,
    #[serde(rename = "Moyenne")]
    Medium,
    #[serde(rename = "Élevée")]
    High,
    #[serde(rename = "Critique")]
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "Aucune",
            Self::Low => "Faible",
            Self::Medium => "Moyenne",
            Self::High => "Élevée",
            Self::Critical => "Critique",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Aucune" => Ok(Self::None),
            "Faible" => Ok(Self::Low),
            "Moyenne" => Ok(Self::Medium),
            "Élevée" => Ok(Self::High),
            "Critique" => Ok(Self::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Input / output
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque request payload handed to a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Image { bytes: Vec<u8>, mime: String },
    Structured(serde_json::Value),
}

/// One inference request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInput {
    pub payload: Payload,
    /// Ask the model to explain its prediction when it can.
    #[serde(default)]
    pub include_reasoning: bool,
}

impl ModelInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            payload: Payload::Text(text.into()),
            include_reasoning: false,
        }
    }

    pub fn image(bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            payload: Payload::Image {
                bytes,
                mime: mime.into(),
            },
            include_reasoning: false,
        }
    }

    pub fn structured(value: serde_json::Value) -> Self {
        Self {
            payload: Payload::Structured(value),
            include_reasoning: false,
        }
    }

    pub fn with_reasoning(mut self, include: bool) -> Self {
        self.include_reasoning = include;
        self
    }

    /// Size recorded in telemetry: characters for text, bytes otherwise.
    pub fn input_length(&self) -> usize {
        match &self.payload {
            Payload::Text(text) => text.chars().count(),
            Payload::Image { bytes, .. } => bytes.len(),
            Payload::Structured(value) => value.to_string().len(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Output of a single inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted label (class, generated text id, recommendation key).
    pub label: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Model-specific extras (scores per class, token counts, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Prediction {
    /// Create a prediction, clamping `confidence` into `[0, 1]`.
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence: clamp_confidence(confidence),
            severity: Severity::None,
            reasoning: None,
            extra: HashMap::new(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Whether the model signalled failure through the sentinel label.
    pub fn is_sentinel_error(&self) -> bool {
        self.label == SENTINEL_ERROR_LABEL
    }
}

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Health / metadata
// ─────────────────────────────────────────────────────────────────────────────

/// Result of a model self-check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded(_) => "degraded",
            Self::Unhealthy(_) => "unhealthy",
        }
    }
}

/// Descriptive metadata of a registered model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub tags: Vec<String>,
    pub provider: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// InferenceModel
// ─────────────────────────────────────────────────────────────────────────────

/// The capability interface every model implementation provides.
///
/// Only `name`, `version` and `predict` are required. CPU-heavy
/// implementations must not block the async scheduler inside `predict`;
/// wrap them with the foundation's blocking adapter instead.
#[async_trait]
pub trait InferenceModel: Send + Sync {
    /// Unique name; the registry key.
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn author(&self) -> &str {
        "unknown"
    }

    fn description(&self) -> &str {
        ""
    }

    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Grouping key for telemetry (the serving backend). Defaults to the name.
    fn provider(&self) -> &str {
        self.name()
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            name: self.name().to_string(),
            version: self.version().to_string(),
            author: self.author().to_string(),
            description: self.description().to_string(),
            tags: self.tags(),
            provider: self.provider().to_string(),
        }
    }

    async fn predict(&self, input: &ModelInput) -> ModelResult<Prediction>;

    /// Predict every input in order. Fails on the first failing item.
    async fn batch_predict(&self, inputs: &[ModelInput]) -> ModelResult<Vec<Prediction>> {
        let mut out = Vec::with_capacity(inputs.len());
        for input in inputs {
            out.push(self.predict(input).await?);
        }
        Ok(out)
    }

    /// Probe the model with a short text payload.
    async fn health_check(&self) -> HealthStatus {
        match self.predict(&ModelInput::text("test")).await {
            Ok(_) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        }
    }
}

/// Shared handle to a model implementation.
pub type DynModel = Arc<dyn InferenceModel>;
