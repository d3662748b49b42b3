use std::fmt;
use std::time::Duration;

/// Failure of a single step.
///
/// Every variant aborts the current sample run; none of them crash the
/// worker that executes it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    #[error("missing required argument '{0}'")]
    MissingArgument(String),

    #[error("template error in argument '{param}': {reason}")]
    Template { param: String, reason: String },

    #[error("{0}")]
    Execution(String),

    #[error("missing context '{0}', a previous step must provide it")]
    MissingContext(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("expected fail")]
    UnexpectedSuccess,

    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),

    #[error("unknown action '{action}' for plugin '{plugin}'")]
    UnknownAction { plugin: String, action: String },
}

/// Coarse classification used for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    StepArgument,
    StepExecution,
    Timeout,
    Negation,
    Internal,
}

impl StepError {
    pub fn execution(msg: impl fmt::Display) -> Self {
        StepError::Execution(msg.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StepError::MissingArgument(_) | StepError::Template { .. } => ErrorKind::StepArgument,
            StepError::Execution(_) | StepError::MissingContext(_) => ErrorKind::StepExecution,
            StepError::Timeout(_) => ErrorKind::Timeout,
            StepError::UnexpectedSuccess => ErrorKind::Negation,
            StepError::UnknownPlugin(_) | StepError::UnknownAction { .. } => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::StepArgument => "step_argument",
            ErrorKind::StepExecution => "step_execution",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Negation => "negation",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}
