//! Capability kinds and priority bindings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Priority reserved for the fallback binding of a capability.
pub const FALLBACK_PRIORITY: u32 = 0;

/// A class of inference task servable by interchangeable implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum CapabilityKind {
    /// Text classification (e.g. depression detection).
    Detection,
    ImageClassification,
    Generation,
    Recommendation,
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detection => "detection",
            Self::ImageClassification => "image_classification",
            Self::Generation => "generation",
            Self::Recommendation => "recommendation",
        }
    }

    /// Kinds that keep a priority-ordered binding set in the registry.
    pub fn has_bindings(&self) -> bool {
        matches!(self, Self::Detection | Self::Generation)
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "detection" => Ok(Self::Detection),
            "image_classification" => Ok(Self::ImageClassification),
            "generation" => Ok(Self::Generation),
            "recommendation" => Ok(Self::Recommendation),
            other => Err(format!("unknown capability kind '{other}'")),
        }
    }
}

/// Association of one model with a capability and a priority.
///
/// Priority 0 marks the fallback; the highest priority above 0 is primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityBinding {
    pub model_name: String,
    pub kind: CapabilityKind,
    pub priority: u32,
}

impl CapabilityBinding {
    pub fn new(model_name: impl Into<String>, kind: CapabilityKind, priority: u32) -> Self {
        Self {
            model_name: model_name.into(),
            kind,
            priority,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.priority == FALLBACK_PRIORITY
    }
}
