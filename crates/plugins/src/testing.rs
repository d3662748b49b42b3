use std::sync::Arc;
use std::time::Duration;

use hidra_runtime::{EvaluationState, PluginContext, TaskDrainer, TaskQueue};
use tokio::time::Instant;

pub fn context() -> (PluginContext, TaskDrainer) {
    let (tasks, drainer) = TaskQueue::start();
    let ctx = PluginContext {
        registry: Arc::new(crate::default_registry().unwrap()),
        tasks,
    };
    (ctx, drainer)
}

pub fn state() -> EvaluationState {
    EvaluationState::new(Instant::now() + Duration::from_secs(10))
}
