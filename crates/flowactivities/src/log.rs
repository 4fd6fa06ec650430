use async_trait::async_trait;
use flowcore::{Activity, ActivityContext, ActivityError, ActivityOutput, Value};
use flowruntime::{ActivityFactory, ActivityMetadata, PortDefinition};
use std::collections::HashMap;

/// Writes its `message` input to the engine log
pub struct LogActivity {
    level: tracing::Level,
    add_details: bool,
}

#[async_trait]
impl Activity for LogActivity {
    fn activity_type(&self) -> &str {
        "log"
    }

    async fn eval(&self, ctx: ActivityContext) -> Result<ActivityOutput, ActivityError> {
        let message = match ctx.inputs.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "(no message)".to_string(),
            Some(other) => serde_json::Value::from(other.clone()).to_string(),
        };

        if self.level == tracing::Level::ERROR {
            tracing::error!(task = %ctx.task_id, flow_id = %ctx.instance_id, "{}", message);
        } else if self.level == tracing::Level::WARN {
            tracing::warn!(task = %ctx.task_id, flow_id = %ctx.instance_id, "{}", message);
        } else if self.level == tracing::Level::INFO {
            tracing::info!(task = %ctx.task_id, flow_id = %ctx.instance_id, "{}", message);
        } else {
            tracing::debug!(task = %ctx.task_id, flow_id = %ctx.instance_id, "{}", message);
        }

        if self.add_details {
            for (key, value) in &ctx.inputs {
                tracing::debug!(task = %ctx.task_id, "  {}: {:?}", key, value);
            }
        }

        Ok(ActivityOutput::new().with_output("message", message))
    }
}

pub struct LogActivityFactory;

impl ActivityFactory for LogActivityFactory {
    fn create(&self, settings: &HashMap<String, Value>) -> Result<Box<dyn Activity>, ActivityError> {
        let level = match settings.get("level").and_then(|v| v.as_str()) {
            None => tracing::Level::INFO,
            Some(level) => level.parse().map_err(|_| {
                ActivityError::Configuration(format!("unknown log level: {}", level))
            })?,
        };
        let add_details = settings
            .get("addDetails")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        Ok(Box::new(LogActivity { level, add_details }))
    }

    fn activity_type(&self) -> &str {
        "log"
    }

    fn metadata(&self) -> ActivityMetadata {
        ActivityMetadata {
            description: "Logs a message at the configured level".to_string(),
            category: "debug".to_string(),
            inputs: vec![PortDefinition::optional("message", "Text to log")],
            outputs: vec![PortDefinition::required("message", "The logged text")],
        }
    }
}
