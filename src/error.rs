use crate::step::StepName;
use thiserror::Error;

/// Boxed error type accepted from step bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error a step body returns from a single attempt.
///
/// Step bodies are external code, so this only carries a message or an
/// arbitrary source error. The engine wraps it into
/// [`WorkflowError::StepError`] together with the step name.
///
/// # Examples
///
/// ```
/// use kumiito::StepError;
///
/// let err = StepError::msg("model endpoint unavailable");
/// assert_eq!(err.to_string(), "model endpoint unavailable");
///
/// let io = std::io::Error::new(std::io::ErrorKind::NotFound, "draft.md");
/// let err = StepError::from_source(io);
/// assert_eq!(err.to_string(), "draft.md");
/// ```
#[derive(Error, Debug)]
pub enum StepError {
    /// A plain failure message.
    #[error("{0}")]
    Message(String),

    /// An underlying error raised by the step body.
    #[error(transparent)]
    Source(BoxError),
}

impl StepError {
    /// Creates a step error from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        StepError::Message(message.into())
    }

    /// Wraps any error type as a step error.
    pub fn from_source<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StepError::Source(Box::new(error))
    }
}

impl From<String> for StepError {
    fn from(message: String) -> Self {
        StepError::Message(message)
    }
}

impl From<&str> for StepError {
    fn from(message: &str) -> Self {
        StepError::Message(message.to_string())
    }
}

impl From<BoxError> for StepError {
    fn from(error: BoxError) -> Self {
        StepError::Source(error)
    }
}

/// The phase of a managed workflow lifecycle.
///
/// Used in [`WorkflowError::Lifecycle`] to identify which hook failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// The `setup` hook, run before execution.
    Setup,
    /// The `execute` hook, which runs the workflow itself.
    Execute,
    /// The `cleanup` hook, run after every execution attempt.
    Cleanup,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecyclePhase::Setup => write!(f, "setup"),
            LifecyclePhase::Execute => write!(f, "execute"),
            LifecyclePhase::Cleanup => write!(f, "cleanup"),
        }
    }
}

/// Errors that can occur while building or running a workflow.
///
/// Configuration variants are returned before any step runs. Per-attempt
/// variants (`StepError`, `Timeout`, `Panicked`) are produced by the engine
/// for every failed attempt; the last one of a permanently failed step is
/// recorded in [`WorkflowResult::errors`](crate::WorkflowResult).
///
/// # Non-Exhaustive
///
/// This enum is marked `#[non_exhaustive]`. When matching on it, always
/// include a wildcard pattern:
///
/// ```
/// use kumiito::WorkflowError;
///
/// fn describe(error: &WorkflowError) -> String {
///     match error {
///         WorkflowError::UnknownDependency { step_name, dependency } => {
///             format!("{step_name} needs {dependency}")
///         }
///         WorkflowError::CycleDetected { steps } => format!("cycle: {steps:?}"),
///         WorkflowError::Timeout { step_name } => format!("{step_name} timed out"),
///         other => other.to_string(),
///     }
/// }
/// ```
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WorkflowError {
    /// A step failed during one attempt.
    #[error("Step failed: {step_name}, details: {details}")]
    StepError {
        /// The name of the step that failed
        step_name: StepName,
        /// Details about the failure
        details: String,
    },

    /// A step exceeded its timeout duration on one attempt.
    #[error("Timeout occurred in step: {step_name}")]
    Timeout {
        /// The name of the step that timed out
        step_name: StepName,
    },

    /// A step body panicked; the panic was contained at the task boundary.
    #[error("Step panicked: {step_name}, details: {details}")]
    Panicked {
        /// The name of the step that panicked
        step_name: StepName,
        /// The panic payload, when it was a string
        details: String,
    },

    /// A step name was registered twice.
    #[error("Duplicate step name: {0}")]
    DuplicateStep(StepName),

    /// A step depends on a name that was never registered.
    #[error("Step '{step_name}' depends on unknown step '{dependency}'")]
    UnknownDependency {
        /// The step declaring the dependency
        step_name: StepName,
        /// The dependency that does not exist
        dependency: StepName,
    },

    /// The dependency graph contains a cycle.
    #[error("Dependency cycle detected involving steps: {}", join_names(.steps))]
    CycleDetected {
        /// Steps that could not be ordered
        steps: Vec<StepName>,
    },

    /// The workflow instance has already been run.
    #[error("Workflow '{0}' has already been executed")]
    AlreadyExecuted(String),

    /// The workflow configuration is invalid.
    #[error("Invalid workflow configuration: {0}")]
    Configuration(String),

    /// Keys a managed workflow needs are absent from its context.
    #[error("Missing required context keys: {}", .0.join(", "))]
    MissingContextKeys(Vec<String>),

    /// A lifecycle hook of a managed workflow failed.
    #[error("Lifecycle '{phase}' failed in workflow '{workflow}': {details}")]
    Lifecycle {
        /// The workflow whose hook failed
        workflow: String,
        /// Which hook failed
        phase: LifecyclePhase,
        /// Details about the failure
        details: String,
    },
}

impl WorkflowError {
    /// Returns `true` for errors detected before any step executes.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            WorkflowError::DuplicateStep(_)
                | WorkflowError::UnknownDependency { .. }
                | WorkflowError::CycleDetected { .. }
                | WorkflowError::AlreadyExecuted(_)
                | WorkflowError::Configuration(_)
        )
    }
}

fn join_names(names: &[StepName]) -> String {
    names
        .iter()
        .map(StepName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
