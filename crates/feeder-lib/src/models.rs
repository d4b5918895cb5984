//! Core data models for the discovery feeder

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label holding a target's scrape address
pub const ADDRESS_LABEL: &str = "__address__";

/// Label overriding the scrape path of a target
pub const METRICS_PATH_LABEL: &str = "__metrics_path__";

/// Prefix marking labels as discovery-origin metadata
pub const META_LABEL_PREFIX: &str = "__meta_";

/// Scrape path used when a registration does not declare one
pub const DEFAULT_METRICS_PATH: &str = "/metrics";

/// Labels declared by an agent when it registers
///
/// Missing fields deserialize as empty so validation can report which one
/// is required instead of failing the whole body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationLabels {
    #[serde(default)]
    pub app: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_path: Option<String>,
}

/// A scrape target registration submitted by an external agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRegistration {
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub labels: RegistrationLabels,
}

impl AgentRegistration {
    pub fn new(app: impl Into<String>, targets: Vec<String>) -> Self {
        Self {
            targets,
            labels: RegistrationLabels {
                app: app.into(),
                ..Default::default()
            },
        }
    }

    pub fn with_instance_name(mut self, instance_name: impl Into<String>) -> Self {
        self.labels.instance_name = Some(instance_name.into());
        self
    }

    pub fn with_metrics_path(mut self, metrics_path: impl Into<String>) -> Self {
        self.labels.metrics_path = Some(metrics_path.into());
        self
    }

    /// Instance name, treating an empty string as absent
    pub fn instance_name(&self) -> Option<&str> {
        self.labels
            .instance_name
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    /// Key under which this registration is stored in the registry
    pub fn key(&self) -> RegistrationKey {
        RegistrationKey::new(&self.labels.app, self.instance_name())
    }
}

/// Identity of a registration; a later registration with the same key
/// replaces the earlier one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegistrationKey {
    pub app: String,
    pub instance_name: String,
}

impl RegistrationKey {
    pub fn new(app: impl Into<String>, instance_name: Option<&str>) -> Self {
        Self {
            app: app.into(),
            instance_name: instance_name.unwrap_or_default().to_string(),
        }
    }
}

impl std::fmt::Display for RegistrationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.instance_name.is_empty() {
            write!(f, "{}", self.app)
        } else {
            write!(f, "{}/{}", self.app, self.instance_name)
        }
    }
}

/// A set of targets sharing common labels, identified by `source`
///
/// A group with no labels and no targets is a tombstone: it tells the
/// consumer that the source no longer exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroup {
    pub source: String,
    pub labels: BTreeMap<String, String>,
    pub targets: Vec<BTreeMap<String, String>>,
}

impl TargetGroup {
    /// Create a removal marker for a source
    pub fn tombstone(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            labels: BTreeMap::new(),
            targets: Vec::new(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.targets.is_empty() && self.labels.is_empty()
    }

    /// Scrape addresses of all targets in the group
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.targets
            .iter()
            .filter_map(|target| target.get(ADDRESS_LABEL).map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_deserializes_with_missing_fields() {
        let registration: AgentRegistration = serde_json::from_str("{}").unwrap();
        assert!(registration.targets.is_empty());
        assert!(registration.labels.app.is_empty());

        let registration: AgentRegistration = serde_json::from_str(
            r#"{"targets": ["10.0.0.1:9100"], "labels": {"app": "svc-a", "instance_name": "a-1"}}"#,
        )
        .unwrap();
        assert_eq!(registration.targets, vec!["10.0.0.1:9100"]);
        assert_eq!(registration.labels.app, "svc-a");
        assert_eq!(registration.instance_name(), Some("a-1"));
        assert_eq!(registration.labels.metrics_path, None);
    }

    #[test]
    fn test_registration_key_ignores_empty_instance_name() {
        let plain = AgentRegistration::new("svc-a", vec!["10.0.0.1:9100".into()]);
        let empty = plain.clone().with_instance_name("");
        assert_eq!(plain.key(), empty.key());
        assert_eq!(plain.key().to_string(), "svc-a");

        let named = plain.with_instance_name("a-1");
        assert_eq!(named.key().to_string(), "svc-a/a-1");
    }

    #[test]
    fn test_tombstone() {
        let tombstone = TargetGroup::tombstone("10.0.0.1:9100");
        assert!(tombstone.is_tombstone());
        assert_eq!(tombstone.addresses().count(), 0);
    }
}
