//! Dispatch protocol.
//!
//! Resolves the model chain for a capability, invokes the primary and fails
//! over to the priority-0 fallback once. Every inference attempt is reported
//! to the telemetry recorder; recording never blocks or fails the caller.

use crate::bridge::{AnalyticsBridge, MetricEvent};
use crate::config::DispatchConfig;
use crate::registry::ModelRegistry;
use crate::telemetry::TelemetryRecorder;
use infergate_kernel::telemetry::{ErrorRecord, PredictionRecord};
use infergate_kernel::{
    CapabilityKind, DispatchError, DispatchResult, DynModel, ModelError, ModelInput, Prediction,
    Severity,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// One inference request.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub input: ModelInput,
    /// Route the request came in on, stored with its telemetry.
    pub endpoint: String,
    pub request_id: Option<String>,
}

impl DispatchRequest {
    pub fn new(input: ModelInput) -> Self {
        Self {
            input,
            endpoint: "/predict".to_string(),
            request_id: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Batch counterpart of [`DispatchRequest`].
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub inputs: Vec<ModelInput>,
    pub endpoint: String,
    pub request_id: Option<String>,
}

impl BatchRequest {
    pub fn new(inputs: Vec<ModelInput>) -> Self {
        Self {
            inputs,
            endpoint: "/predict/batch".to_string(),
            request_id: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Result envelope returned to the routing layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub prediction: String,
    pub confidence: f64,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub model_used: String,
    pub fallback_used: bool,
    pub processing_time_ms: f64,
}

impl DispatchResponse {
    fn new(prediction: Prediction, model_used: String, fallback_used: bool, started: Instant) -> Self {
        Self {
            prediction: prediction.label,
            confidence: prediction.confidence,
            severity: prediction.severity,
            reasoning: prediction.reasoning,
            model_used,
            fallback_used,
            processing_time_ms: elapsed_ms(started),
        }
    }

    /// Analytics event for this envelope under `service`.
    pub fn to_metric_event(&self, service: &str) -> MetricEvent {
        let mut params = Map::new();
        params.insert("prediction".into(), Value::String(self.prediction.clone()));
        params.insert("confidence".into(), json!(self.confidence));
        params.insert("severity".into(), Value::String(self.severity.as_str().to_string()));
        params.insert("latency_ms".into(), json!(self.processing_time_ms));
        params.insert("fallback_used".into(), Value::Bool(self.fallback_used));
        MetricEvent::new(service, "model_prediction", params).with_model(&self.model_used)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub predictions: Vec<Prediction>,
    pub model_used: String,
    pub fallback_used: bool,
    pub processing_time_ms: f64,
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Routes requests to models and reports every attempt.
pub struct Dispatcher {
    registry: Arc<ModelRegistry>,
    recorder: TelemetryRecorder,
    config: DispatchConfig,
    bridge: Option<Arc<AnalyticsBridge>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ModelRegistry>, recorder: TelemetryRecorder, config: DispatchConfig) -> Self {
        Self {
            registry,
            recorder,
            config,
            bridge: None,
        }
    }

    /// Push every successful envelope to `bridge`.
    pub fn with_bridge(mut self, bridge: Arc<AnalyticsBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn has_bridge(&self) -> bool {
        self.bridge.is_some()
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn recorder(&self) -> &TelemetryRecorder {
        &self.recorder
    }

    /// Primary and optional fallback for `kind`.
    ///
    /// The primary comes from the capability binding, then the configured
    /// legacy model name, then the registry default. A fallback that is the
    /// primary itself is dropped.
    fn resolve(&self, kind: CapabilityKind) -> DispatchResult<(DynModel, Option<DynModel>)> {
        let chain = self.registry.chain(kind);
        let primary = chain
            .primary
            .or_else(|| {
                self.config
                    .legacy_models
                    .get(&kind)
                    .and_then(|name| self.registry.get(name))
            })
            .or_else(|| self.registry.get_default())
            .ok_or_else(|| DispatchError::NotAvailable(kind.to_string()))?;

        let fallback = chain
            .fallback
            .filter(|_| self.config.enable_fallback)
            .filter(|fb| fb.name() != primary.name());
        Ok((primary, fallback))
    }

    /// Serve `request` with the chain bound to `kind`.
    pub async fn dispatch(
        &self,
        kind: CapabilityKind,
        request: &DispatchRequest,
    ) -> DispatchResult<DispatchResponse> {
        let started = Instant::now();
        let (primary, fallback) = self.resolve(kind)?;
        debug!(capability = %kind, model = %primary.name(), "dispatching");

        let primary_error = match self.attempt(&primary, request, false).await {
            Ok(prediction) => {
                let response =
                    DispatchResponse::new(prediction, primary.name().to_string(), false, started);
                self.publish(kind, &response);
                return Ok(response);
            }
            Err(e) => e,
        };

        let Some(fallback) = fallback else {
            return Err(DispatchError::InferenceFailure {
                model: primary.name().to_string(),
                source: primary_error,
            });
        };

        warn!(
            capability = %kind,
            primary = %primary.name(),
            fallback = %fallback.name(),
            error = %primary_error,
            "primary model failed, trying fallback"
        );

        match self.attempt(&fallback, request, true).await {
            Ok(prediction) => {
                let response =
                    DispatchResponse::new(prediction, fallback.name().to_string(), true, started);
                self.publish(kind, &response);
                Ok(response)
            }
            Err(source) => Err(DispatchError::FallbackExhausted {
                primary: primary.name().to_string(),
                primary_error,
                fallback: fallback.name().to_string(),
                source,
            }),
        }
    }

    /// Serve `request` with the model registered as `model_name`, without
    /// fallback. Successful envelopes are published under the detection
    /// service.
    pub async fn dispatch_to(
        &self,
        model_name: &str,
        request: &DispatchRequest,
    ) -> DispatchResult<DispatchResponse> {
        let started = Instant::now();
        let model = self
            .registry
            .get(model_name)
            .ok_or_else(|| DispatchError::NotAvailable(model_name.to_string()))?;

        let prediction = self
            .attempt(&model, request, false)
            .await
            .map_err(|source| DispatchError::InferenceFailure {
                model: model_name.to_string(),
                source,
            })?;
        let response = DispatchResponse::new(prediction, model.name().to_string(), false, started);
        self.publish(CapabilityKind::Detection, &response);
        Ok(response)
    }

    /// Serve a whole batch with one model. The fallback decision is taken
    /// once for the batch, and each attempt writes a single record.
    pub async fn dispatch_batch(
        &self,
        kind: CapabilityKind,
        request: &BatchRequest,
    ) -> DispatchResult<BatchResponse> {
        let started = Instant::now();
        let (primary, fallback) = self.resolve(kind)?;
        if request.inputs.is_empty() {
            return Ok(BatchResponse {
                predictions: Vec::new(),
                model_used: primary.name().to_string(),
                fallback_used: false,
                processing_time_ms: elapsed_ms(started),
            });
        }

        let primary_error = match self.attempt_batch(&primary, request, false).await {
            Ok(predictions) => {
                return Ok(BatchResponse {
                    predictions,
                    model_used: primary.name().to_string(),
                    fallback_used: false,
                    processing_time_ms: elapsed_ms(started),
                });
            }
            Err(e) => e,
        };

        let Some(fallback) = fallback else {
            return Err(DispatchError::InferenceFailure {
                model: primary.name().to_string(),
                source: primary_error,
            });
        };

        warn!(
            capability = %kind,
            primary = %primary.name(),
            fallback = %fallback.name(),
            batch_size = request.inputs.len(),
            error = %primary_error,
            "primary model failed on batch, trying fallback"
        );

        match self.attempt_batch(&fallback, request, true).await {
            Ok(predictions) => Ok(BatchResponse {
                predictions,
                model_used: fallback.name().to_string(),
                fallback_used: true,
                processing_time_ms: elapsed_ms(started),
            }),
            Err(source) => Err(DispatchError::FallbackExhausted {
                primary: primary.name().to_string(),
                primary_error,
                fallback: fallback.name().to_string(),
                source,
            }),
        }
    }

    /// Invoke one model and record the outcome.
    ///
    /// A sentinel error label is a successful prediction as far as
    /// telemetry is concerned.
    async fn attempt(
        &self,
        model: &DynModel,
        request: &DispatchRequest,
        fallback_used: bool,
    ) -> Result<Prediction, ModelError> {
        let started = Instant::now();
        let outcome = model.predict(&request.input).await;
        let latency_ms = elapsed_ms(started);
        let input_length = request.input.input_length();

        match &outcome {
            Ok(prediction) => {
                self.recorder.record_prediction(
                    PredictionRecord::new(
                        model.name(),
                        model.provider(),
                        &request.endpoint,
                        &prediction.label,
                        latency_ms,
                    )
                    .with_prediction(prediction)
                    .with_version(model.version())
                    .with_request_id(request.request_id.clone())
                    .with_fallback(fallback_used)
                    .with_input_length(input_length),
                );
            }
            Err(e) => self.record_failure(model, e, &request.endpoint, &request.request_id, input_length),
        }
        outcome
    }

    async fn attempt_batch(
        &self,
        model: &DynModel,
        request: &BatchRequest,
        fallback_used: bool,
    ) -> Result<Vec<Prediction>, ModelError> {
        let started = Instant::now();
        let outcome = model.batch_predict(&request.inputs).await;
        let latency_ms = elapsed_ms(started);
        let input_length: usize = request.inputs.iter().map(ModelInput::input_length).sum();

        match &outcome {
            Ok(predictions) => {
                let summary = summarize_batch(predictions);
                self.recorder.record_prediction(
                    PredictionRecord::new(
                        model.name(),
                        model.provider(),
                        &request.endpoint,
                        &summary.label,
                        latency_ms,
                    )
                    .with_prediction(&summary)
                    .with_version(model.version())
                    .with_request_id(request.request_id.clone())
                    .with_fallback(fallback_used)
                    .with_input_length(input_length)
                    .with_batch_size(u32::try_from(request.inputs.len()).unwrap_or(u32::MAX)),
                );
            }
            Err(e) => self.record_failure(model, e, &request.endpoint, &request.request_id, input_length),
        }
        outcome
    }

    fn record_failure(
        &self,
        model: &DynModel,
        error: &ModelError,
        endpoint: &str,
        request_id: &Option<String>,
        input_length: usize,
    ) {
        self.recorder.record_error(
            ErrorRecord::new(model.name(), model.provider(), error.error_type())
                .with_message(error.to_string())
                .with_endpoint(endpoint)
                .with_request_id(request_id.clone())
                .with_input_length(input_length)
                .with_stack_trace(format!("{error:?}")),
        );
    }

    fn publish(&self, kind: CapabilityKind, response: &DispatchResponse) {
        let Some(bridge) = &self.bridge else {
            return;
        };
        if let Err(e) = bridge.push(response.to_metric_event(kind.as_str())) {
            debug!(error = %e, "analytics push skipped");
        }
    }
}

/// One prediction standing for a whole batch: majority label (first seen
/// wins a tie), mean confidence, highest severity.
fn summarize_batch(predictions: &[Prediction]) -> Prediction {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for p in predictions {
        let count = counts.entry(p.label.as_str()).or_insert(0);
        if *count == 0 {
            order.push(p.label.as_str());
        }
        *count += 1;
    }
    let mut label = "";
    let mut best = 0;
    for candidate in order {
        let count = counts.get(candidate).copied().unwrap_or(0);
        if count > best {
            best = count;
            label = candidate;
        }
    }

    let confidence = if predictions.is_empty() {
        0.0
    } else {
        predictions.iter().map(|p| p.confidence).sum::<f64>() / predictions.len() as f64
    };
    let severity = predictions
        .iter()
        .map(|p| p.severity)
        .max()
        .unwrap_or_default();
    Prediction::new(label, confidence).with_severity(severity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{AnalyticsSink, BridgeResult, RuleCatalog};
    use async_trait::async_trait;
    use infergate_kernel::{InferenceModel, ModelResult};
    use tokio::sync::mpsc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        fail: bool,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn arc(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl InferenceModel for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn version(&self) -> &str {
            "1.0"
        }

        async fn predict(&self, _input: &ModelInput) -> ModelResult<Prediction> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ModelError::Inference(format!("{} down", self.name)))
            } else {
                Ok(Prediction::new("NORMAL", 0.8).with_severity(Severity::Low))
            }
        }
    }

    fn dispatcher(config: DispatchConfig) -> Dispatcher {
        Dispatcher::new(
            Arc::new(ModelRegistry::new()),
            TelemetryRecorder::disabled(),
            config,
        )
    }

    fn request() -> DispatchRequest {
        DispatchRequest::new(ModelInput::text("hello")).with_request_id("r1")
    }

    #[tokio::test]
    async fn nothing_registered_is_not_available() {
        let d = dispatcher(DispatchConfig::default());
        let err = d
            .dispatch(CapabilityKind::Detection, &request())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_AVAILABLE");
    }

    #[tokio::test]
    async fn primary_success_uses_primary() {
        let d = dispatcher(DispatchConfig::default());
        d.registry().register_detection(Fixed::arc("a", false), 10).unwrap();
        d.registry().register_detection(Fixed::arc("b", false), 0).unwrap();
        let res = d.dispatch(CapabilityKind::Detection, &request()).await.unwrap();
        assert_eq!(res.model_used, "a");
        assert!(!res.fallback_used);
        assert_eq!(res.severity, Severity::Low);
    }

    #[tokio::test]
    async fn fallback_used_when_primary_fails() {
        let d = dispatcher(DispatchConfig::default());
        d.registry().register_detection(Fixed::arc("a", true), 10).unwrap();
        d.registry().register_detection(Fixed::arc("b", false), 0).unwrap();
        let res = d.dispatch(CapabilityKind::Detection, &request()).await.unwrap();
        assert_eq!(res.model_used, "b");
        assert!(res.fallback_used);
    }

    #[tokio::test]
    async fn no_fallback_propagates_original_error() {
        let d = dispatcher(DispatchConfig::default());
        d.registry().register_detection(Fixed::arc("a", true), 10).unwrap();
        let err = d
            .dispatch(CapabilityKind::Detection, &request())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INFERENCE_FAILURE");
        assert_eq!(
            err.model_error(),
            Some(&ModelError::Inference("a down".into()))
        );
    }

    #[tokio::test]
    async fn both_failing_is_fallback_exhausted() {
        let d = dispatcher(DispatchConfig::default());
        let b = Fixed::arc("b", true);
        d.registry().register_detection(Fixed::arc("a", true), 10).unwrap();
        d.registry().register_detection(b.clone(), 0).unwrap();
        let err = d
            .dispatch(CapabilityKind::Detection, &request())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FALLBACK_EXHAUSTED");
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fallback_disabled_by_config() {
        let d = dispatcher(DispatchConfig {
            enable_fallback: false,
            ..Default::default()
        });
        let b = Fixed::arc("b", false);
        d.registry().register_detection(Fixed::arc("a", true), 10).unwrap();
        d.registry().register_detection(b.clone(), 0).unwrap();
        let err = d
            .dispatch(CapabilityKind::Detection, &request())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INFERENCE_FAILURE");
        assert_eq!(b.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn legacy_name_then_default() {
        let d = dispatcher(DispatchConfig::default());
        d.registry().register(Fixed::arc("other", false), true).unwrap();
        d.registry().register(Fixed::arc("yansnet-llm", false), false).unwrap();
        let res = d.dispatch(CapabilityKind::Detection, &request()).await.unwrap();
        assert_eq!(res.model_used, "yansnet-llm");

        let res = d
            .dispatch(CapabilityKind::Recommendation, &request())
            .await
            .unwrap();
        assert_eq!(res.model_used, "other");
    }

    #[tokio::test]
    async fn dispatch_to_never_falls_back() {
        let d = dispatcher(DispatchConfig::default());
        d.registry().register_detection(Fixed::arc("a", true), 10).unwrap();
        d.registry().register_detection(Fixed::arc("b", false), 0).unwrap();
        assert_eq!(
            d.dispatch_to("a", &request()).await.unwrap_err().code(),
            "INFERENCE_FAILURE"
        );
        assert_eq!(
            d.dispatch_to("zzz", &request()).await.unwrap_err().code(),
            "NOT_AVAILABLE"
        );
        assert_eq!(d.dispatch_to("b", &request()).await.unwrap().model_used, "b");
    }

    struct ChannelSink(mpsc::UnboundedSender<MetricEvent>);

    #[async_trait]
    impl AnalyticsSink for ChannelSink {
        async fn send(&self, event: &MetricEvent) -> BridgeResult<()> {
            let _ = self.0.send(event.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatch_to_publishes_success() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let bridge = AnalyticsBridge::new(RuleCatalog::default(), Some(Arc::new(ChannelSink(tx))));
        let d = dispatcher(DispatchConfig::default()).with_bridge(Arc::new(bridge));
        d.registry().register_detection(Fixed::arc("a", true), 10).unwrap();
        d.registry().register_detection(Fixed::arc("b", false), 0).unwrap();

        assert!(d.dispatch_to("a", &request()).await.is_err());
        d.dispatch_to("b", &request()).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.service, "detection");
        assert_eq!(event.model_name, "b");
        assert_eq!(event.params["prediction"], serde_json::json!("NORMAL"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn batch_falls_back_once_for_the_whole_batch() {
        let d = dispatcher(DispatchConfig::default());
        let a = Fixed::arc("a", true);
        let b = Fixed::arc("b", false);
        d.registry().register_detection(a.clone(), 10).unwrap();
        d.registry().register_detection(b.clone(), 0).unwrap();
        let batch = BatchRequest::new(vec![ModelInput::text("x"); 3]);
        let res = d
            .dispatch_batch(CapabilityKind::Detection, &batch)
            .await
            .unwrap();
        assert!(res.fallback_used);
        assert_eq!(res.predictions.len(), 3);
        // default batch_predict stops at the first failure
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn batch_summary() {
        let summary = summarize_batch(&[
            Prediction::new("A", 0.2).with_severity(Severity::Low),
            Prediction::new("B", 0.4).with_severity(Severity::Critical),
            Prediction::new("B", 0.6),
        ]);
        assert_eq!(summary.label, "B");
        assert!((summary.confidence - 0.4).abs() < 1e-9);
        assert_eq!(summary.severity, Severity::Critical);
    }

    #[test]
    fn envelope_serializes_with_severity_labels() {
        let response = DispatchResponse {
            prediction: "DEPRESSION".into(),
            confidence: 0.9,
            severity: Severity::High,
            reasoning: None,
            model_used: "a".into(),
            fallback_used: false,
            processing_time_ms: 12.5,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["severity"], "Élevée");
        assert!(value.get("reasoning").is_none());

        let event = response.to_metric_event("detection");
        assert_eq!(event.model_name, "a");
        assert_eq!(event.params["latency_ms"], json!(12.5));
    }
}
