//! Assertions over the shared `output` value.

use std::collections::BTreeMap;

use async_trait::async_trait;
use hidra_core::Metric;
use hidra_runtime::state::missing;
use hidra_runtime::{
    EvaluationState, Plugin, PluginContext, StateKey, StepDefinition, StepError, StepRequest,
};

pub struct StringPlugin;

impl StringPlugin {
    pub fn new() -> Self {
        Self
    }

    fn output(state: &EvaluationState) -> Result<String, StepError> {
        match state.text(StateKey::Output) {
            Some(s) => Ok(s.to_string()),
            None => state
                .bytes(StateKey::Output)
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .map_err(|_| missing(StateKey::Output)),
        }
    }
}

impl Default for StringPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for StringPlugin {
    fn name(&self) -> &str {
        "string"
    }

    fn steps(&self) -> BTreeMap<String, StepDefinition> {
        BTreeMap::from([
            (
                "setOutput".to_string(),
                StepDefinition::new("Store a value as the step output")
                    .required("value", "value to store"),
            ),
            (
                "outputShouldContain".to_string(),
                StepDefinition::new("Fail unless the output contains a substring")
                    .required("search", "substring to look for"),
            ),
            (
                "outputShouldBe".to_string(),
                StepDefinition::new("Fail unless the output equals a value")
                    .required("value", "expected output"),
            ),
        ])
    }

    async fn run_step(
        &self,
        _ctx: &PluginContext,
        state: &mut EvaluationState,
        step: &StepRequest,
        _out: &mut Vec<Metric>,
    ) -> Result<(), StepError> {
        match step.action.as_str() {
            "setOutput" => {
                let value = step.require("value")?;
                state.set_text(StateKey::Output, value);
                Ok(())
            }
            "outputShouldContain" => {
                let search = step.require("search")?;
                let output = Self::output(state)?;
                if output.contains(search) {
                    Ok(())
                } else {
                    Err(StepError::execution(format!(
                        "expected output to contain '{search}'"
                    )))
                }
            }
            "outputShouldBe" => {
                let expected = step.require("value")?;
                let output = Self::output(state)?;
                if output == expected {
                    Ok(())
                } else {
                    Err(StepError::execution(format!(
                        "expected output '{expected}' but got '{output}'"
                    )))
                }
            }
            other => Err(StepError::UnknownAction {
                plugin: self.name().to_string(),
                action: other.to_string(),
            }),
        }
    }
}
