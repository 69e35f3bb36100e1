//! Queue-backed telemetry recorder.
//!
//! Records go through a bounded `tokio::sync::mpsc` channel to a single
//! consumer task that writes them to the store. A full queue drops the
//! record. A store failure is logged and swallowed. Records still queued
//! when the process dies are lost.

use crate::alerting::AlertingEngine;
use crate::config::TelemetryConfig;
use infergate_kernel::telemetry::{
    DynTelemetryStore, ErrorRecord, HealthCheckRecord, PredictionRecord, TelemetryRecord,
    ThroughputRecord,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Strictly increasing process-lifetime counters.
///
/// Unlike the windowed store queries these never go down, so they can back
/// counter-typed metrics.
#[derive(Debug, Default)]
pub struct TelemetryCounters {
    predictions: AtomicU64,
    errors: AtomicU64,
    fallbacks: AtomicU64,
    health_checks: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub predictions_total: u64,
    pub errors_total: u64,
    pub fallbacks_total: u64,
    pub health_checks_total: u64,
    pub dropped_total: u64,
}

impl TelemetryCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            predictions_total: self.predictions.load(Ordering::Relaxed),
            errors_total: self.errors.load(Ordering::Relaxed),
            fallbacks_total: self.fallbacks.load(Ordering::Relaxed),
            health_checks_total: self.health_checks.load(Ordering::Relaxed),
            dropped_total: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn observe(&self, tally: Tally) {
        match tally {
            Tally::Prediction { fallback } => {
                self.predictions.fetch_add(1, Ordering::Relaxed);
                if fallback {
                    self.fallbacks.fetch_add(1, Ordering::Relaxed);
                }
            }
            Tally::Error => {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
            Tally::HealthCheck => {
                self.health_checks.fetch_add(1, Ordering::Relaxed);
            }
            Tally::Uncounted => {}
        }
    }
}

/// Which counters a record bumps once the queue accepts it.
#[derive(Clone, Copy)]
enum Tally {
    Prediction { fallback: bool },
    Error,
    HealthCheck,
    Uncounted,
}

impl Tally {
    fn of(record: &TelemetryRecord) -> Self {
        match record {
            TelemetryRecord::Prediction(r) => Self::Prediction {
                fallback: r.fallback_used,
            },
            TelemetryRecord::Error(_) => Self::Error,
            TelemetryRecord::HealthCheck(_) => Self::HealthCheck,
            TelemetryRecord::Throughput(_) => Self::Uncounted,
        }
    }
}

enum Command {
    Record(Box<TelemetryRecord>),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Cheap, cloneable handle to the telemetry pipeline.
#[derive(Clone)]
pub struct TelemetryRecorder {
    tx: Option<mpsc::Sender<Command>>,
    counters: Arc<TelemetryCounters>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TelemetryRecorder {
    /// Spawn the consumer task. Must be called inside a Tokio runtime.
    ///
    /// When `alerting` is set, every persisted error record triggers its
    /// error-rate check for the record's `(model_name, provider)`.
    pub fn start(
        store: DynTelemetryStore,
        alerting: Option<Arc<AlertingEngine>>,
        config: &TelemetryConfig,
    ) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let handle = tokio::spawn(run_worker(rx, store, alerting));
        Self {
            tx: Some(tx),
            counters: Arc::new(TelemetryCounters::default()),
            worker: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// A recorder that accepts and discards everything.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            counters: Arc::new(TelemetryCounters::default()),
            worker: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    pub fn record_prediction(&self, record: PredictionRecord) {
        self.enqueue(TelemetryRecord::Prediction(record));
    }

    pub fn record_error(&self, record: ErrorRecord) {
        self.enqueue(TelemetryRecord::Error(record));
    }

    pub fn record_health_check(&self, record: HealthCheckRecord) {
        self.enqueue(TelemetryRecord::HealthCheck(record));
    }

    pub fn record_throughput(&self, record: ThroughputRecord) {
        self.enqueue(TelemetryRecord::Throughput(record));
    }

    /// Queue a record without waiting. Never fails the caller.
    pub fn enqueue(&self, record: TelemetryRecord) {
        let Some(tx) = &self.tx else {
            return;
        };
        let tally = Tally::of(&record);
        match tx.try_send(Command::Record(Box::new(record))) {
            Ok(()) => self.counters.observe(tally),
            Err(mpsc::error::TrySendError::Full(cmd)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                if let Command::Record(record) = cmd {
                    warn!(
                        kind = record.kind(),
                        model = %record.model_name(),
                        "telemetry queue full, record dropped"
                    );
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("telemetry recorder stopped, record dropped");
            }
        }
    }

    /// Wait until every record queued before this call has been handled.
    pub async fn flush(&self) {
        let Some(tx) = &self.tx else {
            return;
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if tx.send(Command::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Drain what is queued, then stop the consumer task.
    pub async fn shutdown(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Command::Shutdown).await;
        }
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "telemetry worker ended abnormally");
            }
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<Command>,
    store: DynTelemetryStore,
    alerting: Option<Arc<AlertingEngine>>,
) {
    debug!("telemetry worker started");
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Record(record) => persist(&store, alerting.as_deref(), *record).await,
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
            Command::Shutdown => break,
        }
    }
    debug!("telemetry worker stopped");
}

async fn persist(
    store: &DynTelemetryStore,
    alerting: Option<&AlertingEngine>,
    record: TelemetryRecord,
) {
    let outcome = match &record {
        TelemetryRecord::Prediction(r) => store.append_prediction(r).await,
        TelemetryRecord::Error(r) => store.append_error(r).await,
        TelemetryRecord::HealthCheck(r) => store.append_health_check(r).await,
        TelemetryRecord::Throughput(r) => store.append_throughput(r).await,
    };

    if let Err(e) = outcome {
        error!(
            kind = record.kind(),
            model = %record.model_name(),
            error = %e,
            "failed to persist telemetry record"
        );
        return;
    }

    if let (TelemetryRecord::Error(r), Some(alerting)) = (&record, alerting) {
        alerting
            .check_error_rate_alert(&r.model_name, &r.provider)
            .await;
    }
}
