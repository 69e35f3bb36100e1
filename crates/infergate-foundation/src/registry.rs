//! Capability registry.
//!
//! Holds every model instance by name plus the priority-ordered bindings of
//! the detection and generation capabilities. All pointers live behind one
//! lock so a dispatch never observes a half-updated primary/fallback pair.

use futures::future::join_all;
use infergate_kernel::{
    CapabilityKind, DynModel, FALLBACK_PRIORITY, HealthStatus, ModelInfo, RegistryError,
    RegistryResult,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// A model plus the registry's view of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelListing {
    #[serde(flatten)]
    pub info: ModelInfo,
    pub is_default: bool,
}

/// Primary and fallback resolved together for one capability.
#[derive(Clone, Default)]
pub struct BindingChain {
    pub primary: Option<DynModel>,
    pub fallback: Option<DynModel>,
}

struct DetectionBinding {
    priority: u32,
    seq: u64,
}

#[derive(Default)]
struct RegistryState {
    models: HashMap<String, DynModel>,
    /// Registration order, oldest first.
    order: Vec<String>,
    default: Option<String>,
    detection: HashMap<String, DetectionBinding>,
    detection_primary: Option<String>,
    /// Generation bindings in registration order.
    generation: Vec<String>,
    generation_primary: Option<String>,
    next_seq: u64,
}

impl RegistryState {
    fn insert(&mut self, model: DynModel) -> String {
        let name = model.name().to_string();
        if self.models.insert(name.clone(), model).is_some() {
            warn!(model = %name, "model re-registered, previous instance replaced");
        } else {
            self.order.push(name.clone());
        }
        name
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Highest priority above the fallback level wins. The current primary
    /// keeps its place on a tie; otherwise the most recent binding wins.
    fn recompute_detection_primary(&mut self) {
        let Some(max) = self
            .detection
            .values()
            .map(|b| b.priority)
            .filter(|p| *p > FALLBACK_PRIORITY)
            .max()
        else {
            self.detection_primary = None;
            return;
        };

        let incumbent_holds = self
            .detection_primary
            .as_ref()
            .and_then(|name| self.detection.get(name))
            .is_some_and(|b| b.priority == max);
        if incumbent_holds {
            return;
        }

        self.detection_primary = self
            .detection
            .iter()
            .filter(|(_, b)| b.priority == max)
            .max_by_key(|(_, b)| b.seq)
            .map(|(name, _)| name.clone());
    }

    fn detection_fallback(&self) -> Option<&String> {
        self.detection
            .iter()
            .filter(|(_, b)| b.priority == FALLBACK_PRIORITY)
            .max_by_key(|(_, b)| b.seq)
            .map(|(name, _)| name)
    }

    fn model(&self, name: Option<&String>) -> Option<DynModel> {
        name.and_then(|n| self.models.get(n)).cloned()
    }
}

/// Name → instance map with detection/generation bindings.
///
/// Constructed once by the composition root and shared behind an `Arc`.
/// Registration is expected at startup but is safe to interleave with
/// dispatch.
#[derive(Default)]
pub struct ModelRegistry {
    state: RwLock<RegistryState>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn validate(model: &DynModel) -> RegistryResult<()> {
        let name = model.name();
        if name.trim().is_empty() {
            return Err(RegistryError::InvalidModel {
                name: name.to_string(),
                reason: "name cannot be empty".into(),
            });
        }
        if model.version().trim().is_empty() {
            return Err(RegistryError::InvalidModel {
                name: name.to_string(),
                reason: "version cannot be empty".into(),
            });
        }
        Ok(())
    }

    /// Insert or replace a model by name. It becomes the default when
    /// `as_default` is set or when no default exists yet.
    pub fn register(&self, model: DynModel, as_default: bool) -> RegistryResult<()> {
        Self::validate(&model)?;
        let mut state = self.state.write();
        let name = state.insert(model);
        if as_default || state.default.is_none() {
            state.default = Some(name.clone());
        }
        info!(model = %name, default = as_default, "model registered");
        Ok(())
    }

    /// Add or update a detection binding and recompute the primary.
    ///
    /// Priority 0 marks the fallback.
    pub fn register_detection(&self, model: DynModel, priority: u32) -> RegistryResult<()> {
        Self::validate(&model)?;
        let mut state = self.state.write();
        let name = state.insert(model);
        if state.default.is_none() {
            state.default = Some(name.clone());
        }
        let seq = state.bump_seq();
        state
            .detection
            .insert(name.clone(), DetectionBinding { priority, seq });
        state.recompute_detection_primary();
        info!(
            model = %name,
            priority,
            primary = ?state.detection_primary,
            "detection binding registered"
        );
        Ok(())
    }

    /// Add a generation binding. The first one, or any registered with
    /// `as_primary`, becomes the primary.
    pub fn register_generation(&self, model: DynModel, as_primary: bool) -> RegistryResult<()> {
        Self::validate(&model)?;
        let mut state = self.state.write();
        let name = state.insert(model);
        if state.default.is_none() {
            state.default = Some(name.clone());
        }
        if !state.generation.contains(&name) {
            state.generation.push(name.clone());
        }
        if as_primary || state.generation_primary.is_none() {
            state.generation_primary = Some(name.clone());
        }
        info!(model = %name, primary = as_primary, "generation binding registered");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<DynModel> {
        self.state.read().models.get(name).cloned()
    }

    pub fn get_default(&self) -> Option<DynModel> {
        let state = self.state.read();
        state.model(state.default.as_ref())
    }

    pub fn default_name(&self) -> Option<String> {
        self.state.read().default.clone()
    }

    pub fn get_detection_primary(&self) -> Option<DynModel> {
        let state = self.state.read();
        state.model(state.detection_primary.as_ref())
    }

    /// The detection binding registered with priority exactly 0.
    pub fn get_detection_fallback(&self) -> Option<DynModel> {
        let state = self.state.read();
        state.model(state.detection_fallback())
    }

    pub fn get_generation_primary(&self) -> Option<DynModel> {
        let state = self.state.read();
        state.model(state.generation_primary.as_ref())
    }

    /// Primary and fallback for `kind`, read under a single lock.
    ///
    /// Kinds without bindings resolve to an empty chain.
    pub fn chain(&self, kind: CapabilityKind) -> BindingChain {
        let state = self.state.read();
        match kind {
            CapabilityKind::Detection => BindingChain {
                primary: state.model(state.detection_primary.as_ref()),
                fallback: state.model(state.detection_fallback()),
            },
            CapabilityKind::Generation => BindingChain {
                primary: state.model(state.generation_primary.as_ref()),
                fallback: None,
            },
            _ => BindingChain::default(),
        }
    }

    /// Detection bindings as `(name, priority)`, highest priority first;
    /// equal priorities list the most recent registration first.
    pub fn list_detection_by_priority_desc(&self) -> Vec<(String, u32)> {
        let state = self.state.read();
        let mut out: Vec<_> = state
            .detection
            .iter()
            .map(|(name, b)| (name.clone(), b.priority, b.seq))
            .collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)));
        out.into_iter().map(|(name, p, _)| (name, p)).collect()
    }

    /// Names in registration order.
    pub fn get_model_names(&self) -> Vec<String> {
        self.state.read().order.clone()
    }

    pub fn list_models(&self) -> Vec<ModelListing> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|name| state.models.get(name))
            .map(|model| ModelListing {
                info: model.info(),
                is_default: state.default.as_deref() == Some(model.name()),
            })
            .collect()
    }

    /// Remove a model and every binding that references it.
    ///
    /// A removed default moves to the oldest remaining model; a removed
    /// generation primary moves to the oldest remaining generation binding.
    /// Returns `false` when the name is unknown.
    pub fn unregister(&self, name: &str) -> bool {
        let mut state = self.state.write();
        if state.models.remove(name).is_none() {
            return false;
        }
        state.order.retain(|n| n != name);
        state.generation.retain(|n| n != name);

        if state.detection.remove(name).is_some() {
            if state.detection_primary.as_deref() == Some(name) {
                state.detection_primary = None;
            }
            state.recompute_detection_primary();
        }
        if state.generation_primary.as_deref() == Some(name) {
            state.generation_primary = state.generation.first().cloned();
        }
        if state.default.as_deref() == Some(name) {
            state.default = state.order.first().cloned();
            info!(removed = %name, default = ?state.default, "default model reassigned");
        }
        info!(model = %name, "model unregistered");
        true
    }

    pub fn clear(&self) {
        *self.state.write() = RegistryState::default();
        debug!("registry cleared");
    }

    pub fn len(&self) -> usize {
        self.state.read().models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every model's self-check concurrently.
    ///
    /// A check that panics is reported as unhealthy; it never aborts the
    /// other checks.
    pub async fn health_check_all(&self) -> BTreeMap<String, HealthStatus> {
        let models: Vec<DynModel> = self.state.read().models.values().cloned().collect();

        let handles = models.into_iter().map(|model| {
            let name = model.name().to_string();
            let handle = tokio::spawn(async move { model.health_check().await });
            async move { (name, handle.await) }
        });

        join_all(handles)
            .await
            .into_iter()
            .map(|(name, outcome)| {
                let status = outcome.unwrap_or_else(|e| {
                    warn!(model = %name, error = %e, "health check task failed");
                    HealthStatus::Unhealthy(format!("health check failed: {e}"))
                });
                (name, status)
            })
            .collect()
    }
}
