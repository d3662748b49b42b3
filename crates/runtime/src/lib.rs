pub mod error;
pub mod plugin;
pub mod registry;
pub mod runner;
pub mod state;
pub mod step;
pub mod tasks;
pub mod template;

#[cfg(test)]
mod testing;

pub use error::{ErrorKind, StepError};
pub use plugin::{ParamSpec, Plugin, PluginContext, StepDefinition, StepRequest};
pub use registry::{PluginRegistry, RegistryError};
pub use runner::{Reporter, RunOutcome, SampleRunner, StepRecord, MIN_RUN_TIMEOUT};
pub use state::{EvaluationState, HttpExchange, StateKey, StateValue};
pub use step::{StepExecution, StepRuntime};
pub use tasks::{TaskDrainer, TaskQueue};
pub use template::TemplateEngine;
