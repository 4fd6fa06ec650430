use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    /// Bad settings or runtime configuration, reported before a run starts.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A flow URI that could not be resolved to a definition.
    #[error("Unable to resolve flow: {0}")]
    Resolution(String),

    /// The requested operation is missing something it needs.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Activity error: {0}")]
    Activity(#[from] ActivityError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActivityError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Unknown activity type: {0}")]
    UnknownActivity(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,
}

/// Why a running instance transitioned to `Failed`.
///
/// Cloneable so that the same failure can be handed to the tracer, the
/// recorder and the result handler.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Task '{task}' failed: {source}")]
    TaskFailed {
        task: String,
        #[source]
        source: ActivityError,
    },

    #[error("Step limit of {limit} reached before the flow finished")]
    StepLimitExceeded { limit: u64 },

    #[error("Run cancelled at step {step}")]
    Cancelled { step: u64 },

    #[error("Flow stalled at step {step} with no schedulable work")]
    Stalled { step: u64 },

    /// Carries the message of a failure restored from persisted state.
    #[error("{0}")]
    Restored(String),
}

#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("Invalid flow definition: {0}")]
    Invalid(String),

    #[error("Cyclic dependency detected")]
    CyclicDependency,

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("Invalid link: {0}")]
    InvalidLink(String),
}
