//! Minijinja rendering of step parameters and variable scopes.
//!
//! Templates see four names: `env` (process environment), `date`
//! (wallclock at render time), `variables` (the run's variable scope) and
//! the `ctx("<key>")` function over the evaluation state. Undefined lookups
//! render as empty strings.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, Timelike, Utc};
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

use crate::error::StepError;
use crate::state::EvaluationState;

#[derive(Debug, Serialize)]
struct DateContext {
    unix: i64,
    unix_ms: i64,
    rfc3339: String,
    iso_date: String,
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
}

impl DateContext {
    fn now() -> Self {
        let now = Utc::now();
        Self {
            unix: now.timestamp(),
            unix_ms: now.timestamp_millis(),
            rfc3339: now.to_rfc3339(),
            iso_date: now.format("%Y-%m-%d").to_string(),
            year: now.year(),
            month: now.month(),
            day: now.day(),
            hour: now.hour(),
            minute: now.minute(),
            second: now.second(),
        }
    }
}

#[derive(Debug, Serialize)]
struct TemplateContext<'a> {
    env: BTreeMap<String, String>,
    date: DateContext,
    variables: &'a BTreeMap<String, String>,
}

/// Renders parameter templates. A fresh environment is built per render
/// batch so `ctx()` sees the state as it is when the step starts.
#[derive(Debug, Default)]
pub struct TemplateEngine {
    _private: (),
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Whether `value` contains any template syntax.
    pub fn is_template(value: &str) -> bool {
        value.contains("{{") || value.contains("{%") || value.contains("{#")
    }

    fn build_env(ctx_values: HashMap<String, String>) -> Environment<'static> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        env.add_function("ctx", move |key: String| -> String {
            ctx_values.get(&key).cloned().unwrap_or_default()
        });
        env
    }

    /// Render every argument. `state` supplies `ctx()` and `variables`.
    pub fn render_args(
        &self,
        args: &BTreeMap<String, String>,
        state: &EvaluationState,
    ) -> Result<BTreeMap<String, String>, StepError> {
        if !args.values().any(|v| Self::is_template(v)) {
            return Ok(args.clone());
        }

        let env = Self::build_env(state.snapshot());
        let variables = state.variables();
        let context = TemplateContext {
            env: std::env::vars().collect(),
            date: DateContext::now(),
            variables: &variables,
        };

        args.iter()
            .map(|(name, raw)| {
                if !Self::is_template(raw) {
                    return Ok((name.clone(), raw.clone()));
                }
                env.render_str(raw, &context)
                    .map(|rendered| (name.clone(), rendered))
                    .map_err(|e| StepError::Template {
                        param: name.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect()
    }

    /// Render a variable scope. Variables may refer to `env` and `date` but
    /// not to each other or to `ctx()`.
    pub fn render_scope(
        &self,
        scope: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, StepError> {
        if !scope.values().any(|v| Self::is_template(v)) {
            return Ok(scope.clone());
        }

        let env = Self::build_env(HashMap::new());
        let empty = BTreeMap::new();
        let context = TemplateContext {
            env: std::env::vars().collect(),
            date: DateContext::now(),
            variables: &empty,
        };

        scope
            .iter()
            .map(|(name, raw)| {
                env.render_str(raw, &context)
                    .map(|rendered| (name.clone(), rendered))
                    .map_err(|e| StepError::Template {
                        param: format!("variables.{name}"),
                        reason: e.to_string(),
                    })
            })
            .collect()
    }
}
