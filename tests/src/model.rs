use async_trait::async_trait;
use infergate_kernel::{
    DynModel, HealthStatus, InferenceModel, ModelError, ModelInput, ModelResult, Prediction,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// What a [`MockModel`] does on one call.
#[derive(Debug, Clone)]
pub enum Outcome {
    Predict(Prediction),
    Fail(ModelError),
}

/// A scripted model.
///
/// Calls consume queued outcomes first and then repeat the standing
/// outcome. Every input is recorded.
#[derive(Clone)]
pub struct MockModel {
    name: String,
    version: String,
    provider: Option<String>,
    latency: Option<Duration>,
    standing: Arc<RwLock<Outcome>>,
    script: Arc<RwLock<VecDeque<Outcome>>>,
    health: Arc<RwLock<HealthStatus>>,
    /// Inputs of every call, oldest first.
    pub call_history: Arc<RwLock<Vec<ModelInput>>>,
}

impl MockModel {
    /// Succeeds with `NORMAL` at 0.9 confidence.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: "1.0".to_string(),
            provider: None,
            latency: None,
            standing: Arc::new(RwLock::new(Outcome::Predict(Prediction::new("NORMAL", 0.9)))),
            script: Arc::new(RwLock::new(VecDeque::new())),
            health: Arc::new(RwLock::new(HealthStatus::Healthy)),
            call_history: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Always raises an inference error.
    pub fn failing(name: &str) -> Self {
        let mut model = Self::new(name);
        model.standing = Arc::new(RwLock::new(Outcome::Fail(ModelError::Inference(format!(
            "{name} failed"
        )))));
        model
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.to_string());
        self
    }

    /// Sleep this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn into_dyn(self) -> DynModel {
        Arc::new(self)
    }

    pub async fn set_prediction(&self, prediction: Prediction) {
        *self.standing.write().await = Outcome::Predict(prediction);
    }

    pub async fn fail_with(&self, error: ModelError) {
        *self.standing.write().await = Outcome::Fail(error);
    }

    /// Queue a one-shot outcome for the next call.
    pub async fn push_outcome(&self, outcome: Outcome) {
        self.script.write().await.push_back(outcome);
    }

    pub async fn set_health(&self, health: HealthStatus) {
        *self.health.write().await = health;
    }

    pub async fn history(&self) -> Vec<ModelInput> {
        self.call_history.read().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.call_history.read().await.len()
    }

    async fn next_outcome(&self) -> Outcome {
        if let Some(outcome) = self.script.write().await.pop_front() {
            return outcome;
        }
        self.standing.read().await.clone()
    }
}

#[async_trait]
impl InferenceModel for MockModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn provider(&self) -> &str {
        self.provider.as_deref().unwrap_or(&self.name)
    }

    async fn predict(&self, input: &ModelInput) -> ModelResult<Prediction> {
        self.call_history.write().await.push(input.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match self.next_outcome().await {
            Outcome::Predict(prediction) => Ok(prediction),
            Outcome::Fail(error) => Err(error),
        }
    }

    async fn health_check(&self) -> HealthStatus {
        self.health.read().await.clone()
    }
}

#[macro_export]
macro_rules! assert_model_called {
    ($model:expr, $expected_count:expr) => {
        let count = $model.call_count().await;
        assert_eq!(
            count, $expected_count,
            "Expected model '{}' to be called {} times, but was called {} times",
            $model.name(),
            $expected_count,
            count
        );
    };
}
