use std::collections::BTreeMap;

use serde::Serialize;

/// One observation emitted by a plugin step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    pub labels: BTreeMap<String, String>,
    pub description: String,
    /// When set, existing series of this family that match this one on the
    /// sample's labels, the step and every label outside `purge_labels` are
    /// dropped before the run's writes.
    pub purge: bool,
    pub purge_labels: Vec<String>,
}

impl Metric {
    pub fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
            labels: BTreeMap::new(),
            description: String::new(),
            purge: false,
            purge_labels: Vec::new(),
        }
    }

    pub fn label(mut self, key: &str, value: impl Into<String>) -> Self {
        self.labels.insert(key.to_string(), value.into());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn purge_on(mut self, keys: &[&str]) -> Self {
        self.purge = true;
        self.purge_labels = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    /// `name{k="v",...}`, used as the key in report snapshots.
    pub fn series_key(&self) -> String {
        if self.labels.is_empty() {
            return self.name.clone();
        }
        let labels: Vec<String> = self
            .labels
            .iter()
            .map(|(k, v)| format!("{k}=\"{v}\""))
            .collect();
        format!("{}{{{}}}", self.name, labels.join(","))
    }
}
