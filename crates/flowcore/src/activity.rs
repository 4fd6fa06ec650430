use crate::{ActivityError, TaskId, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Core trait that all executable activities implement
#[async_trait]
pub trait Activity: Send + Sync {
    /// Unique type identifier (e.g., "log", "math.multiply")
    fn activity_type(&self) -> &str;

    /// Evaluate the activity with the given context
    async fn eval(&self, ctx: ActivityContext) -> Result<ActivityOutput, ActivityError>;

    /// Optional: Validate settings at definition load time
    fn validate_settings(&self, _settings: &HashMap<String, Value>) -> Result<(), ActivityError> {
        Ok(())
    }
}

/// Evaluation context passed to each activity
#[derive(Clone)]
pub struct ActivityContext {
    /// Task being evaluated
    pub task_id: TaskId,

    /// Owning flow instance
    pub instance_id: String,

    /// Inputs resolved from the task's mappings
    pub inputs: HashMap<String, Value>,

    /// Static settings for this task
    pub settings: HashMap<String, Value>,

    /// Cancellation signal of the owning run
    pub cancellation: CancellationToken,
}

impl ActivityContext {
    pub fn new(task_id: impl Into<TaskId>, instance_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            instance_id: instance_id.into(),
            inputs: HashMap::new(),
            settings: HashMap::new(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, ActivityError> {
        self.inputs
            .get(name)
            .ok_or_else(|| ActivityError::MissingInput(name.to_string()))
    }

    /// Get required numeric input
    pub fn require_number(&self, name: &str) -> Result<f64, ActivityError> {
        let value = self.require_input(name)?;
        value.as_f64().ok_or_else(|| ActivityError::InvalidInputType {
            field: name.to_string(),
            expected: "number".to_string(),
            actual: value.type_name().to_string(),
        })
    }

    /// Get setting value or return error
    pub fn require_setting(&self, name: &str) -> Result<&Value, ActivityError> {
        self.settings
            .get(name)
            .ok_or_else(|| ActivityError::Configuration(format!("Missing setting: {}", name)))
    }

    /// Get setting with default
    pub fn setting_or(&self, name: &str, default: Value) -> Value {
        self.settings.get(name).cloned().unwrap_or(default)
    }
}

/// Output from activity evaluation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActivityOutput {
    pub outputs: HashMap<String, Value>,
}

impl ActivityOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(name.into(), value.into());
        self
    }
}
