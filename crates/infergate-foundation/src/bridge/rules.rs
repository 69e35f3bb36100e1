//! Declarative alert rules evaluated against metric events.

use super::{BridgeError, MetricEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
}

impl Operator {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Lt => value < threshold,
            Self::Ge => value >= threshold,
            Self::Le => value <= threshold,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
        }
    }
}

/// One catalog entry. `model` restricts the rule to a single model name;
/// `priority` is forwarded untouched (catalogs use both strings and numbers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub service: String,
    #[serde(default)]
    pub model: Option<String>,
    pub metric: String,
    pub operator: Operator,
    pub threshold: f64,
    pub priority: Value,
}

impl AlertRule {
    fn applies_to(&self, event: &MetricEvent) -> bool {
        if self.service != event.service {
            return false;
        }
        match self.model.as_deref() {
            Some(model) if !model.is_empty() => model == event.model_name,
            _ => true,
        }
    }
}

/// Tags attached to an event that tripped at least one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertTags {
    pub alert_reason: String,
    pub alert_priority: Value,
}

impl AlertTags {
    /// Write the tags into event params. `alert_triggered` is the string
    /// `"true"` so the sink can filter on it as a dimension.
    pub fn apply(&self, params: &mut serde_json::Map<String, Value>) {
        params.insert("alert_triggered".into(), Value::String("true".into()));
        params.insert("alert_reason".into(), Value::String(self.alert_reason.clone()));
        params.insert("alert_priority".into(), self.alert_priority.clone());
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleCatalog {
    rules: Vec<AlertRule>,
}

impl RuleCatalog {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self { rules }
    }

    pub fn from_json(json: &str) -> Result<Self, BridgeError> {
        let rules: Vec<AlertRule> =
            serde_json::from_str(json).map_err(|e| BridgeError::Catalog(e.to_string()))?;
        Ok(Self { rules })
    }

    /// Load a catalog file. A missing or malformed file yields an empty
    /// catalog, so alerting is simply disabled.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let loaded = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Catalog(e.to_string()))
            .and_then(|json| Self::from_json(&json));
        match loaded {
            Ok(catalog) => {
                info!(path = %path.display(), rules = catalog.len(), "rule catalog loaded");
                catalog
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "cannot load rule catalog");
                Self::default()
            }
        }
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate every rule against `event`.
    ///
    /// All rules are checked; when several match, the tags come from the
    /// last matching rule in catalog order, not the highest priority one.
    /// Metric values that are not numbers never match.
    pub fn evaluate(&self, event: &MetricEvent) -> Option<AlertTags> {
        let mut tags = None;
        for rule in self.rules.iter().filter(|r| r.applies_to(event)) {
            let Some(value) = event.params.get(&rule.metric).and_then(Value::as_f64) else {
                continue;
            };
            if rule.operator.holds(value, rule.threshold) {
                warn!(
                    service = %event.service,
                    metric = %rule.metric,
                    value,
                    operator = rule.operator.as_str(),
                    threshold = rule.threshold,
                    "analytics rule triggered"
                );
                tags = Some(AlertTags {
                    alert_reason: format!("{}_fail", rule.metric),
                    alert_priority: rule.priority.clone(),
                });
            }
        }
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CATALOG: &str = r#"[
        {"service": "detection", "metric": "latency_ms", "operator": ">", "threshold": 1000, "priority": "high"},
        {"service": "detection", "metric": "confidence", "operator": "<", "threshold": 0.5, "priority": 2},
        {"service": "detection", "model": "other", "metric": "confidence", "operator": "<", "threshold": 0.9, "priority": "low"},
        {"service": "generation", "metric": "latency_ms", "operator": ">=", "threshold": 1, "priority": "p1"}
    ]"#;

    fn event(params: serde_json::Value) -> MetricEvent {
        let params = params.as_object().cloned().unwrap_or_default();
        MetricEvent::new("detection", "model_prediction", params).with_model("yansnet-llm")
    }

    #[test]
    fn operators() {
        assert!(Operator::Gt.holds(2.0, 1.0));
        assert!(!Operator::Gt.holds(1.0, 1.0));
        assert!(Operator::Ge.holds(1.0, 1.0));
        assert!(Operator::Lt.holds(0.5, 1.0));
        assert!(Operator::Le.holds(1.0, 1.0));
        let op: Operator = serde_json::from_str("\">=\"").unwrap();
        assert_eq!(op, Operator::Ge);
    }

    #[test]
    fn last_matching_rule_wins() {
        let catalog = RuleCatalog::from_json(CATALOG).unwrap();
        let tags = catalog
            .evaluate(&event(json!({"latency_ms": 1500.0, "confidence": 0.3})))
            .unwrap();
        assert_eq!(tags.alert_reason, "confidence_fail");
        assert_eq!(tags.alert_priority, json!(2));
    }

    #[test]
    fn model_filter_and_service_filter() {
        let catalog = RuleCatalog::from_json(CATALOG).unwrap();
        // rule 3 targets "other", so 0.7 confidence does not match
        assert!(catalog.evaluate(&event(json!({"confidence": 0.7}))).is_none());

        let tags = catalog
            .evaluate(&event(json!({"latency_ms": 2000})))
            .unwrap();
        assert_eq!(tags.alert_reason, "latency_ms_fail");
        assert_eq!(tags.alert_priority, json!("high"));
    }

    #[test]
    fn non_numeric_values_never_match() {
        let catalog = RuleCatalog::from_json(CATALOG).unwrap();
        assert!(catalog.evaluate(&event(json!({"latency_ms": "slow"}))).is_none());
    }

    #[test]
    fn missing_catalog_is_empty() {
        let catalog = RuleCatalog::load("/nonexistent/catalog.json");
        assert!(catalog.is_empty());
        assert!(RuleCatalog::from_json("{").is_err());
    }

    #[test]
    fn tags_written_into_params() {
        let mut params = serde_json::Map::new();
        AlertTags {
            alert_reason: "latency_ms_fail".into(),
            alert_priority: json!("high"),
        }
        .apply(&mut params);
        assert_eq!(params["alert_triggered"], json!("true"));
        assert_eq!(params["alert_reason"], json!("latency_ms_fail"));
    }
}
