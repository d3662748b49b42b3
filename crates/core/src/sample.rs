//! Sample definitions: one YAML file describes one check.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::duration;
use crate::error::{ConfigError, Result};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// One declarative operation inside a sample.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StepConfig {
    /// Empty means "same plugin as the previous step".
    #[serde(default)]
    pub plugin: String,
    #[serde(default)]
    pub action: String,
    #[serde(default, deserialize_with = "scalar_map")]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub negate: bool,
}

impl StepConfig {
    pub fn new(plugin: &str, action: &str) -> Self {
        Self {
            plugin: plugin.to_string(),
            action: action.to_string(),
            parameters: BTreeMap::new(),
            negate: false,
        }
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.parameters.insert(key.to_string(), value.to_string());
        self
    }

    pub fn negated(mut self) -> Self {
        self.negate = true;
        self
    }
}

/// A validated check definition.
///
/// Created on load, replaced wholesale on reload, never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleConfig {
    pub name: String,
    pub path: PathBuf,
    pub description: String,
    pub tags: BTreeMap<String, String>,
    pub interval: Duration,
    pub timeout: Duration,
    pub retry: u32,
    pub steps: Vec<StepConfig>,
    pub variables: Vec<BTreeMap<String, String>>,
}

/// On-disk shape before defaults and validation are applied.
#[derive(Debug, Deserialize)]
struct SampleFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default, deserialize_with = "scalar_map")]
    tags: BTreeMap<String, String>,
    #[serde(default, with = "duration::serde_str::option")]
    interval: Option<Duration>,
    #[serde(default, with = "duration::serde_str::option")]
    timeout: Option<Duration>,
    #[serde(default)]
    retry: u32,
    #[serde(default)]
    steps: Option<Vec<StepConfig>>,
    #[serde(default, deserialize_with = "scalar_map_list")]
    variables: Vec<BTreeMap<String, String>>,
}

impl SampleConfig {
    /// Read and validate a sample file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(path, &contents)
    }

    /// Parse sample YAML. `path` is recorded on the result and supplies the
    /// default name (its file stem).
    pub fn from_yaml(path: &Path, contents: &str) -> Result<Self> {
        let file: SampleFile = serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let name = match file.name.filter(|n| !n.trim().is_empty()) {
            Some(n) => n,
            None => path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
                .ok_or_else(|| ConfigError::MissingField("name".to_string()))?,
        };

        let sample = Self {
            name,
            path: path.to_path_buf(),
            description: file.description,
            tags: file.tags,
            interval: file.interval.unwrap_or(DEFAULT_INTERVAL),
            timeout: file.timeout.unwrap_or(DEFAULT_TIMEOUT),
            retry: file.retry,
            steps: file.steps.unwrap_or_default(),
            variables: file.variables,
        };
        sample.validate()?;
        Ok(sample)
    }

    fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(self.invalid("interval", "must be greater than zero"));
        }
        if self.timeout.is_zero() {
            return Err(self.invalid("timeout", "must be greater than zero"));
        }
        let first = self
            .steps
            .first()
            .ok_or_else(|| ConfigError::MissingField(format!("{}: steps", self.name)))?;
        if first.plugin.trim().is_empty() {
            return Err(self.invalid("steps[0].plugin", "the first step must name a plugin"));
        }
        for (idx, step) in self.steps.iter().enumerate() {
            if step.action.trim().is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "{}: steps[{idx}].action",
                    self.name
                )));
            }
        }
        Ok(())
    }

    fn invalid(&self, field: &str, reason: &str) -> ConfigError {
        ConfigError::Invalid {
            field: format!("{}: {field}", self.name),
            reason: reason.to_string(),
        }
    }

    /// Plugin of the first step, used as the `kind` label.
    pub fn kind(&self) -> &str {
        self.steps.first().map(|s| s.plugin.as_str()).unwrap_or_default()
    }

    /// Variable scopes to run. A sample without `variables` runs once with
    /// an empty scope.
    pub fn scopes(&self) -> Vec<BTreeMap<String, String>> {
        if self.variables.is_empty() {
            vec![BTreeMap::new()]
        } else {
            self.variables.clone()
        }
    }
}

fn scalar_to_string(value: serde_yaml::Value) -> std::result::Result<String, String> {
    match value {
        serde_yaml::Value::Null => Ok(String::new()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::String(s) => Ok(s),
        other => Err(format!("expected a scalar value, got {other:?}")),
    }
}

/// String map that tolerates numeric and boolean YAML scalars (`statusCode: 200`).
fn scalar_map<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, serde_yaml::Value>>::deserialize(deserializer)?;
    raw.unwrap_or_default()
        .into_iter()
        .map(|(k, v)| {
            scalar_to_string(v)
                .map(|v| (k.clone(), v))
                .map_err(|e| serde::de::Error::custom(format!("{k}: {e}")))
        })
        .collect()
}

fn scalar_map_list<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<BTreeMap<String, String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Scope(#[serde(deserialize_with = "scalar_map")] BTreeMap<String, String>);

    let raw = Option::<Vec<Scope>>::deserialize(deserializer)?;
    Ok(raw.unwrap_or_default().into_iter().map(|s| s.0).collect())
}
