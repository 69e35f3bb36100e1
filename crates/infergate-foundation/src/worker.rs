//! Blocking inference pool.
//!
//! CPU-heavy models implement the synchronous [`BlockingInference`] trait and
//! are wrapped in [`BlockingModel`], which runs every call on Tokio's
//! blocking threads. A semaphore caps how many inferences run at once so a
//! burst cannot exhaust the blocking pool.

use async_trait::async_trait;
use infergate_kernel::{
    HealthStatus, InferenceModel, ModelError, ModelInput, ModelResult, Prediction,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

/// Synchronous model implementation.
pub trait BlockingInference: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn provider(&self) -> &str {
        self.name()
    }

    fn infer(&self, input: &ModelInput) -> ModelResult<Prediction>;
}

/// Bounded gate in front of `spawn_blocking`.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` on a blocking thread once a permit is free.
    ///
    /// A panicking job surfaces as [`ModelError::WorkerPool`].
    pub async fn run<F, T>(&self, job: F) -> ModelResult<T>
    where
        F: FnOnce() -> ModelResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ModelError::WorkerPool(e.to_string()))?;

        tokio::task::spawn_blocking(job).await.map_err(|e| {
            warn!(error = %e, "blocking inference task failed");
            ModelError::WorkerPool(e.to_string())
        })?
    }
}

/// [`InferenceModel`] adapter over a [`BlockingInference`].
pub struct BlockingModel<M> {
    inner: Arc<M>,
    pool: WorkerPool,
}

impl<M: BlockingInference> BlockingModel<M> {
    pub fn new(inner: M, pool: WorkerPool) -> Self {
        Self {
            inner: Arc::new(inner),
            pool,
        }
    }
}

#[async_trait]
impl<M: BlockingInference> InferenceModel for BlockingModel<M> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn version(&self) -> &str {
        self.inner.version()
    }

    fn provider(&self) -> &str {
        self.inner.provider()
    }

    async fn predict(&self, input: &ModelInput) -> ModelResult<Prediction> {
        let inner = self.inner.clone();
        let input = input.clone();
        self.pool.run(move || inner.infer(&input)).await
    }

    /// The whole batch runs as one blocking job holding one permit.
    async fn batch_predict(&self, inputs: &[ModelInput]) -> ModelResult<Vec<Prediction>> {
        let inner = self.inner.clone();
        let inputs = inputs.to_vec();
        self.pool
            .run(move || inputs.iter().map(|i| inner.infer(i)).collect())
            .await
    }

    async fn health_check(&self) -> HealthStatus {
        match self.predict(&ModelInput::text("test")).await {
            Ok(_) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        }
    }
}
