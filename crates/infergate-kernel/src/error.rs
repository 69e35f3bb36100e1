//! Error types for the kernel contracts.
//!
//! Each concern gets its own enum so callers can match on exactly the
//! failures that concern can produce. All enums are `#[non_exhaustive]`.

use thiserror::Error;

/// Failure raised by a model implementation during inference.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModelError {
    /// The model ran but could not produce a prediction.
    #[error("inference failed: {0}")]
    Inference(String),

    /// The payload is not something this model accepts.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The model (or its upstream endpoint) cannot be reached.
    #[error("model unavailable: {0}")]
    Unavailable(String),

    /// The model implementation gave up after its own deadline.
    #[error("inference timed out after {0} ms")]
    Timeout(u64),

    /// The blocking worker running the inference failed or panicked.
    #[error("worker pool error: {0}")]
    WorkerPool(String),
}

impl ModelError {
    /// Short machine-readable classification stored in error records.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Inference(_) => "InferenceError",
            Self::InvalidInput(_) => "InvalidInput",
            Self::Unavailable(_) => "Unavailable",
            Self::Timeout(_) => "Timeout",
            Self::WorkerPool(_) => "WorkerPoolError",
        }
    }
}

pub type ModelResult<T> = Result<T, ModelError>;

/// Registry mutation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RegistryError {
    /// The instance does not satisfy the model contract (empty name or version).
    #[error("invalid model '{name}': {reason}")]
    InvalidModel { name: String, reason: String },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Failure returned to the caller of the dispatch protocol.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// No binding, legacy model or default could serve the request.
    #[error("no model available for '{0}'")]
    NotAvailable(String),

    /// The selected model raised and no fallback was attempted.
    #[error("model '{model}' failed: {source}")]
    InferenceFailure {
        model: String,
        #[source]
        source: ModelError,
    },

    /// The primary raised and so did the fallback.
    #[error("primary '{primary}' failed ({primary_error}); fallback '{fallback}' failed: {source}")]
    FallbackExhausted {
        primary: String,
        primary_error: ModelError,
        fallback: String,
        #[source]
        source: ModelError,
    },
}

impl DispatchError {
    /// Stable code the routing layer maps to a response status.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAvailable(_) => "NOT_AVAILABLE",
            Self::InferenceFailure { .. } => "INFERENCE_FAILURE",
            Self::FallbackExhausted { .. } => "FALLBACK_EXHAUSTED",
        }
    }

    /// True for every variant caused by a model raising.
    pub fn is_inference_failure(&self) -> bool {
        matches!(
            self,
            Self::InferenceFailure { .. } | Self::FallbackExhausted { .. }
        )
    }

    /// The error raised by the last model that was invoked, if any.
    pub fn model_error(&self) -> Option<&ModelError> {
        match self {
            Self::NotAvailable(_) => None,
            Self::InferenceFailure { source, .. } | Self::FallbackExhausted { source, .. } => {
                Some(source)
            }
        }
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Telemetry and alert store errors.
///
/// These never reach an inference caller: the recorder, aggregation engine
/// and alerting engine catch and log them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TelemetryError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("record not found: {0}")]
    NotFound(String),

    /// No pooled handle became free within the command timeout.
    #[error("store operation timed out: {0}")]
    Timeout(String),

    #[error("telemetry error: {0}")]
    Other(String),
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;

impl From<serde_json::Error> for TelemetryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
