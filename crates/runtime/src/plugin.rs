use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use hidra_core::Metric;

use crate::error::StepError;
use crate::registry::PluginRegistry;
use crate::state::EvaluationState;
use crate::tasks::TaskQueue;

/// Reserved action invoked after a step fails, within the same plugin.
pub const ON_FAILURE: &str = "onFailure";
/// Reserved action invoked once per plugin after a run finishes.
pub const ON_CLOSE: &str = "onClose";

/// One parameter accepted by an action.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub description: String,
    pub optional: bool,
}

/// Describes one named action within a plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct StepDefinition {
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl StepDefinition {
    pub fn new(description: &str) -> Self {
        Self {
            description: description.to_string(),
            params: Vec::new(),
        }
    }

    pub fn required(mut self, name: &str, description: &str) -> Self {
        self.params.push(ParamSpec {
            name: name.to_string(),
            description: description.to_string(),
            optional: false,
        });
        self
    }

    pub fn optional(mut self, name: &str, description: &str) -> Self {
        self.params.push(ParamSpec {
            name: name.to_string(),
            description: description.to_string(),
            optional: true,
        });
        self
    }

    /// First required parameter absent from `args`.
    pub fn missing_required<'a>(&'a self, args: &BTreeMap<String, String>) -> Option<&'a str> {
        self.params
            .iter()
            .find(|p| !p.optional && !args.contains_key(&p.name))
            .map(|p| p.name.as_str())
    }
}

/// A parsed step ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRequest {
    pub plugin: String,
    pub action: String,
    pub args: BTreeMap<String, String>,
    pub negate: bool,
}

impl StepRequest {
    pub fn new(plugin: &str, action: &str) -> Self {
        Self {
            plugin: plugin.to_string(),
            action: action.to_string(),
            args: BTreeMap::new(),
            negate: false,
        }
    }

    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).map(String::as_str)
    }

    pub fn require(&self, name: &str) -> Result<&str, StepError> {
        self.arg(name)
            .ok_or_else(|| StepError::MissingArgument(name.to_string()))
    }

    /// Parse an optional argument, falling back to `default` when absent.
    pub fn parse_or<T>(&self, name: &str, default: T) -> Result<T, StepError>
    where
        T: std::str::FromStr,
        T::Err: fmt::Display,
    {
        match self.arg(name) {
            None | Some("") => Ok(default),
            Some(raw) => raw.parse::<T>().map_err(|e| {
                StepError::execution(format!("invalid value '{raw}' for '{name}': {e}"))
            }),
        }
    }
}

impl fmt::Display for StepRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.plugin, self.action)
    }
}

/// Handles available to handlers beyond the evaluation state.
///
/// Cross-plugin collaboration goes through `registry` lookups; heavy
/// follow-up work goes through `tasks`.
#[derive(Clone)]
pub struct PluginContext {
    pub registry: Arc<PluginRegistry>,
    pub tasks: TaskQueue,
}

/// A collector for one protocol family.
///
/// Plugins are object-safe, Send + Sync, and async. The step table is read
/// once when the plugin is registered.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Registry key (e.g. `"http"`).
    fn name(&self) -> &str;

    /// Action name to definition. May include [`ON_FAILURE`] and [`ON_CLOSE`].
    fn steps(&self) -> BTreeMap<String, StepDefinition>;

    /// Run one action. Metrics pushed to `out` are kept even when an error
    /// is returned.
    async fn run_step(
        &self,
        ctx: &PluginContext,
        state: &mut EvaluationState,
        step: &StepRequest,
        out: &mut Vec<Metric>,
    ) -> Result<(), StepError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_ignores_optional_params() {
        let def = StepDefinition::new("request")
            .required("url", "target")
            .optional("method", "verb");

        let mut args = BTreeMap::new();
        assert_eq!(def.missing_required(&args), Some("url"));

        args.insert("url".to_string(), "http://x".to_string());
        assert_eq!(def.missing_required(&args), None);
    }

    #[test]
    fn parse_or_uses_default_and_reports_bad_values() {
        let mut step = StepRequest::new("tcp", "read");
        assert_eq!(step.parse_or("bytes", 512usize).unwrap(), 512);

        step.args.insert("bytes".to_string(), "64".to_string());
        assert_eq!(step.parse_or("bytes", 512usize).unwrap(), 64);

        step.args.insert("bytes".to_string(), "lots".to_string());
        assert!(matches!(step.parse_or("bytes", 512usize), Err(StepError::Execution(_))));
    }
}
