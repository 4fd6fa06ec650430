use async_trait::async_trait;
use flowcore::{Activity, ActivityContext, ActivityError, ActivityOutput, Value};
use flowruntime::{ActivityFactory, ActivityMetadata, PortDefinition};
use std::collections::HashMap;

/// Fails the task with the given `message`
pub struct ThrowActivity;

#[async_trait]
impl Activity for ThrowActivity {
    fn activity_type(&self) -> &str {
        "error.throw"
    }

    async fn eval(&self, ctx: ActivityContext) -> Result<ActivityOutput, ActivityError> {
        let message = ctx
            .inputs
            .get("message")
            .and_then(Value::coerce_to_string)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "error thrown by flow".to_string());
        Err(ActivityError::ExecutionFailed(message))
    }
}

pub struct ThrowActivityFactory;

impl ActivityFactory for ThrowActivityFactory {
    fn create(&self, _settings: &HashMap<String, Value>) -> Result<Box<dyn Activity>, ActivityError> {
        Ok(Box::new(ThrowActivity))
    }

    fn activity_type(&self) -> &str {
        "error.throw"
    }

    fn metadata(&self) -> ActivityMetadata {
        ActivityMetadata {
            description: "Fail the flow with a message".to_string(),
            category: "control".to_string(),
            inputs: vec![PortDefinition::optional("message", "Failure message")],
            outputs: vec![],
        }
    }
}
