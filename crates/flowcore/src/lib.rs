//! Core abstractions for the flow engine
//!
//! This crate provides the vocabulary shared by the runtime and the
//! activity library: dynamic values, flow definitions, the activity
//! trait and the error taxonomy. It does not depend on an async runtime.

mod activity;
mod definition;
mod error;
mod value;

pub use activity::{Activity, ActivityContext, ActivityOutput};
pub use definition::{
    AttrSpec, ErrorHandling, FlowDefinition, FlowSettings, IoMetadata, Link, RetryPolicy,
    TaskId, TaskSpec,
};
pub use error::{ActivityError, DefinitionError, ExecutionError, FlowError};
pub use value::Value;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
