//! Scripted plugin used by the runtime's unit tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hidra_core::Metric;

use crate::error::StepError;
use crate::plugin::{Plugin, PluginContext, StepDefinition, StepRequest, ON_CLOSE, ON_FAILURE};
use crate::registry::PluginRegistry;
use crate::state::{EvaluationState, HttpExchange, StateKey, StateValue};
use crate::step::StepRuntime;
use crate::tasks::TaskQueue;

pub struct ScriptedPlugin {
    name: String,
    hooks: bool,
    pub calls: Arc<AtomicUsize>,
    pub on_failure_calls: Arc<AtomicUsize>,
    pub on_close_calls: Arc<AtomicUsize>,
    /// Remaining failures for the `flaky` action.
    pub flaky_failures: Arc<AtomicUsize>,
}

impl ScriptedPlugin {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            hooks: true,
            calls: Arc::new(AtomicUsize::new(0)),
            on_failure_calls: Arc::new(AtomicUsize::new(0)),
            on_close_calls: Arc::new(AtomicUsize::new(0)),
            flaky_failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn without_hooks(name: &str) -> Self {
        Self {
            hooks: false,
            ..Self::new(name)
        }
    }
}

#[async_trait]
impl Plugin for ScriptedPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn steps(&self) -> BTreeMap<String, StepDefinition> {
        let mut steps = BTreeMap::new();
        steps.insert("succeed".to_string(), StepDefinition::new("always succeeds"));
        steps.insert("fail".to_string(), StepDefinition::new("always fails"));
        steps.insert("flaky".to_string(), StepDefinition::new("fails a scripted number of times"));
        steps.insert(
            "echo".to_string(),
            StepDefinition::new("stores text as output").required("text", "text to store"),
        );
        steps.insert(
            "sleep".to_string(),
            StepDefinition::new("sleeps").optional("ms", "milliseconds"),
        );
        steps.insert("respond".to_string(), StepDefinition::new("records a fake HTTP response"));
        if self.hooks {
            steps.insert(ON_FAILURE.to_string(), StepDefinition::new("captures failure"));
            steps.insert(ON_CLOSE.to_string(), StepDefinition::new("counts closes"));
        }
        steps
    }

    async fn run_step(
        &self,
        _ctx: &PluginContext,
        state: &mut EvaluationState,
        step: &StepRequest,
        out: &mut Vec<Metric>,
    ) -> Result<(), StepError> {
        match step.action.as_str() {
            ON_FAILURE => {
                self.on_failure_calls.fetch_add(1, Ordering::SeqCst);
                let last = state.last_error().unwrap_or_default().to_string();
                state.attach("failure.txt", last.into_bytes());
                Err(StepError::execution("hook failure is swallowed"))
            }
            ON_CLOSE => {
                self.on_close_calls.fetch_add(1, Ordering::SeqCst);
                Err(StepError::execution("close errors are only logged"))
            }
            action => {
                self.calls.fetch_add(1, Ordering::SeqCst);
                match action {
                    "succeed" => {
                        out.push(Metric::new("mock_value", 1.0).label("plugin", &self.name));
                        Ok(())
                    }
                    "fail" => {
                        out.push(Metric::new("mock_value", 0.0).label("plugin", &self.name));
                        Err(StepError::execution("scripted failure"))
                    }
                    "flaky" => {
                        let left = self.flaky_failures.load(Ordering::SeqCst);
                        if left > 0 {
                            self.flaky_failures.store(left - 1, Ordering::SeqCst);
                            Err(StepError::execution("flaky failure"))
                        } else {
                            Ok(())
                        }
                    }
                    "echo" => {
                        let text = step.require("text")?;
                        state.set_text(StateKey::Output, text);
                        out.push(Metric::new("echo_length", text.len() as f64).label("text", text));
                        Ok(())
                    }
                    "sleep" => {
                        let ms: u64 = step.parse_or("ms", 10)?;
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        Ok(())
                    }
                    "respond" => {
                        state.set_text(StateKey::ConnectionIp, "127.0.0.1");
                        state.insert(
                            StateKey::HttpResponse,
                            StateValue::HttpResponse(HttpExchange {
                                url: "http://127.0.0.1/".to_string(),
                                final_url: "http://127.0.0.1/".to_string(),
                                method: "GET".to_string(),
                                status_code: 503,
                                headers: BTreeMap::from([(
                                    "content-type".to_string(),
                                    "text/plain".to_string(),
                                )]),
                                elapsed: Duration::from_millis(5),
                            }),
                        );
                        Ok(())
                    }
                    other => Err(StepError::execution(format!("unscripted action {other}"))),
                }
            }
        }
    }
}

pub fn context_with(plugins: Vec<ScriptedPlugin>) -> PluginContext {
    let mut registry = PluginRegistry::new();
    for plugin in plugins {
        registry.register(plugin).unwrap();
    }
    let (tasks, _drainer) = TaskQueue::start();
    PluginContext {
        registry: Arc::new(registry),
        tasks,
    }
}

pub fn runtime_with(plugins: Vec<ScriptedPlugin>) -> StepRuntime {
    StepRuntime::new(context_with(plugins))
}
