use infergate_foundation::{
    BlockingInference, BlockingModel, DispatchRequest, Infergate, InfergateConfig,
};
use infergate_kernel::alert::{AlertSeverity, ERROR_RATE_HIGH};
use infergate_kernel::stats::Window;
use infergate_kernel::telemetry::{RecordFilter, TelemetryStore};
use infergate_kernel::{
    CapabilityKind, HealthStatus, InferenceModel, ModelError, ModelInput, ModelResult, Prediction,
    Severity,
};
use infergate_monitoring::MetricsApi;
use infergate_testing::{FailingStore, MockModel, Outcome};
use std::time::Duration;

fn request(text: &str) -> DispatchRequest {
    DispatchRequest::new(ModelInput::text(text)).with_endpoint("/depression/predict")
}

#[tokio::test]
async fn test_primary_failure_falls_back_and_is_recorded() {
    let app = Infergate::in_memory(InfergateConfig::default());
    let a = MockModel::new("A").arc();
    let b = MockModel::new("B").arc();
    a.push_outcome(Outcome::Fail(ModelError::Inference("cuda oom".into())))
        .await;
    app.registry.register_detection(a.clone(), 10).unwrap();
    app.registry.register_detection(b.clone(), 0).unwrap();

    let first = app
        .dispatcher
        .dispatch(CapabilityKind::Detection, &request("r1"))
        .await
        .unwrap();
    assert_eq!(first.model_used, "B");
    assert!(first.fallback_used);

    let second = app
        .dispatcher
        .dispatch(CapabilityKind::Detection, &request("r2"))
        .await
        .unwrap();
    assert_eq!(second.model_used, "A");
    assert!(!second.fallback_used);

    app.recorder.flush().await;

    let stats = app.aggregation.model_stats(None, Window::hours(24)).await;
    let a_stats = stats.iter().find(|s| s.model_name == "A").unwrap();
    let b_stats = stats.iter().find(|s| s.model_name == "B").unwrap();
    assert_eq!(a_stats.total_requests, 1);
    assert_eq!(a_stats.error_count, 1);
    assert_eq!(b_stats.total_requests, 1);
    assert_eq!(b_stats.fallback_count, 1);
    assert_eq!(b_stats.fallback_rate, 100.0);

    let errors = app.aggregation.recent_errors(Some("A"), None).await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_type, "InferenceError");
    assert_eq!(errors[0].endpoint.as_deref(), Some("/depression/predict"));

    infergate_testing::assert_model_called!(a, 2);
    infergate_testing::assert_model_called!(b, 1);

    let counters = app.recorder.counters();
    assert_eq!(counters.predictions_total, 2);
    assert_eq!(counters.errors_total, 1);
    assert_eq!(counters.fallbacks_total, 1);
    app.shutdown().await;
}

#[tokio::test]
async fn test_no_fallback_propagates_original_error() {
    let app = Infergate::in_memory(InfergateConfig::default());
    let a = MockModel::new("A").arc();
    a.fail_with(ModelError::Unavailable("upstream down".into()))
        .await;
    app.registry.register_detection(a, 10).unwrap();

    let err = app
        .dispatcher
        .dispatch(CapabilityKind::Detection, &request("x"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INFERENCE_FAILURE");
    assert_eq!(
        err.model_error(),
        Some(&ModelError::Unavailable("upstream down".into()))
    );
}

#[tokio::test]
async fn test_sentinel_label_is_a_prediction() {
    let app = Infergate::in_memory(InfergateConfig::default());
    let a = MockModel::new("A").arc();
    a.set_prediction(Prediction::new("ERREUR", 0.0)).await;
    app.registry.register_detection(a, 10).unwrap();
    app.registry
        .register_detection(MockModel::new("B").arc(), 0)
        .unwrap();

    let res = app
        .dispatcher
        .dispatch(CapabilityKind::Detection, &request("x"))
        .await
        .unwrap();
    assert_eq!(res.prediction, "ERREUR");
    assert!(!res.fallback_used);

    app.recorder.flush().await;
    let stats = app.aggregation.model_stats(Some("A"), Window::default()).await;
    assert_eq!(stats[0].label_count("ERREUR"), 1);
    assert_eq!(stats[0].error_count, 0);
}

#[tokio::test]
async fn test_error_burst_raises_one_alert() {
    let app = Infergate::in_memory(InfergateConfig::default());
    let a = MockModel::new("A").arc();
    a.push_outcome(Outcome::Predict(Prediction::new("NORMAL", 0.9)))
        .await;
    a.fail_with(ModelError::Inference("cuda oom".into())).await;
    app.registry.register_detection(a, 10).unwrap();

    for _ in 0..3 {
        let _ = app
            .dispatcher
            .dispatch(CapabilityKind::Detection, &request("x"))
            .await;
    }
    app.recorder.flush().await;

    let active = app.alerting.active_alerts().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].alert_type, ERROR_RATE_HIGH);
    assert_eq!(active[0].model_name.as_deref(), Some("A"));
    assert_eq!(active[0].severity, AlertSeverity::Critical);

    let api = MetricsApi::from_service(&app);
    assert!(api.resolve(active[0].id).await);
    assert!(api.resolve(active[0].id).await);
    assert!(api.list_active().await.is_empty());
}

#[tokio::test]
async fn test_store_failures_never_reach_the_caller() {
    let store = FailingStore::shared();
    let app = Infergate::start(InfergateConfig::default(), store.clone(), store.clone());
    app.registry
        .register_detection(MockModel::failing("A").arc(), 10)
        .unwrap();
    app.registry
        .register_detection(MockModel::new("B").arc(), 0)
        .unwrap();

    let res = app
        .dispatcher
        .dispatch(CapabilityKind::Detection, &request("x"))
        .await
        .unwrap();
    assert_eq!(res.model_used, "B");
    app.recorder.flush().await;
    assert!(store.calls() >= 2);

    let api = MetricsApi::from_service(&app);
    let summary = api.summary(None).await;
    assert_eq!(summary.total_predictions, 0);
    assert!(api.model_stats(None, None).await.is_empty());
    assert!(api.recent_errors(None, None).await.is_empty());
    assert_eq!(api.health().await.status, "degraded");
    assert!(!api.resolve(uuid::Uuid::new_v4()).await);
}

#[tokio::test]
async fn test_health_check_all_reports_each_model() {
    let app = Infergate::in_memory(InfergateConfig::default());
    let sick = MockModel::new("sick").arc();
    sick.set_health(HealthStatus::Unhealthy("weights missing".into()))
        .await;
    app.registry.register(MockModel::new("ok").into_dyn(), true).unwrap();
    app.registry.register(sick, false).unwrap();

    let report = app.run_health_checks().await;
    assert!(report["ok"].is_healthy());
    assert!(!report["sick"].is_healthy());

    app.recorder.flush().await;
    let rows = app
        .telemetry_store
        .scan_health_checks(&RecordFilter::new().model("sick"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "unhealthy");
    assert_eq!(
        rows[0].details,
        Some(serde_json::json!({"reason": "weights missing"}))
    );
    assert_eq!(app.recorder.counters().health_checks_total, 2);
}

#[tokio::test]
async fn test_latency_percentiles_over_recorded_traffic() {
    let app = Infergate::in_memory(InfergateConfig::default());
    let slow = MockModel::new("slow")
        .with_latency(Duration::from_millis(5))
        .arc();
    app.registry.register_detection(slow, 10).unwrap();
    for i in 0..5 {
        app.dispatcher
            .dispatch(CapabilityKind::Detection, &request(&i.to_string()))
            .await
            .unwrap();
    }
    app.recorder.flush().await;

    let latency = app
        .aggregation
        .latency_percentiles("slow", Window::hours(1))
        .await
        .unwrap();
    assert_eq!(latency.total_requests, 5);
    assert!(latency.min_ms.unwrap() >= 5.0);
    assert!(latency.p50_ms.unwrap() <= latency.p95_ms.unwrap());
}

struct Keyword;

impl BlockingInference for Keyword {
    fn name(&self) -> &str {
        "keyword"
    }

    fn version(&self) -> &str {
        "2.1"
    }

    fn infer(&self, input: &ModelInput) -> ModelResult<Prediction> {
        match input.as_text() {
            Some(text) if text.contains("triste") => {
                Ok(Prediction::new("DEPRESSION", 0.7).with_severity(Severity::Medium))
            }
            Some(_) => Ok(Prediction::new("NORMAL", 0.6)),
            None => Err(ModelError::InvalidInput("text expected".into())),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_model_served_through_worker_pool() {
    let app = Infergate::in_memory(InfergateConfig::default());
    let model = BlockingModel::new(Keyword, app.workers.clone());
    assert_eq!(model.version(), "2.1");
    app.registry
        .register_detection(std::sync::Arc::new(model), 5)
        .unwrap();

    let res = app
        .dispatcher
        .dispatch(CapabilityKind::Detection, &request("je suis triste"))
        .await
        .unwrap();
    assert_eq!(res.prediction, "DEPRESSION");
    assert_eq!(res.severity, Severity::Medium);

    let err = app
        .dispatcher
        .dispatch(
            CapabilityKind::Detection,
            &DispatchRequest::new(ModelInput::structured(serde_json::json!({"a": 1}))),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INFERENCE_FAILURE");
    app.shutdown().await;
}
