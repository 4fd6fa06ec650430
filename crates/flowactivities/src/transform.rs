use async_trait::async_trait;
use flowcore::{Activity, ActivityContext, ActivityError, ActivityOutput, Value};
use flowruntime::{ActivityFactory, ActivityMetadata, PortDefinition};
use std::collections::HashMap;

/// Parse a JSON string into a value
pub struct JsonParseActivity;

#[async_trait]
impl Activity for JsonParseActivity {
    fn activity_type(&self) -> &str {
        "json.parse"
    }

    async fn eval(&self, ctx: ActivityContext) -> Result<ActivityOutput, ActivityError> {
        let input = ctx.require_input("json")?;
        let text = input.as_str().ok_or_else(|| ActivityError::InvalidInputType {
            field: "json".to_string(),
            expected: "string".to_string(),
            actual: input.type_name().to_string(),
        })?;

        let parsed: Value = serde_json::from_str(text)
            .map_err(|e| ActivityError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

        Ok(ActivityOutput::new().with_output("parsed", parsed))
    }
}

pub struct JsonParseActivityFactory;

impl ActivityFactory for JsonParseActivityFactory {
    fn create(&self, _settings: &HashMap<String, Value>) -> Result<Box<dyn Activity>, ActivityError> {
        Ok(Box::new(JsonParseActivity))
    }

    fn activity_type(&self) -> &str {
        "json.parse"
    }

    fn metadata(&self) -> ActivityMetadata {
        ActivityMetadata {
            description: "Parse a JSON string".to_string(),
            category: "transform".to_string(),
            inputs: vec![PortDefinition::required("json", "JSON text")],
            outputs: vec![PortDefinition::required("parsed", "Parsed value")],
        }
    }
}

/// Render a value as JSON text
pub struct JsonStringifyActivity {
    pretty: bool,
}

#[async_trait]
impl Activity for JsonStringifyActivity {
    fn activity_type(&self) -> &str {
        "json.stringify"
    }

    async fn eval(&self, ctx: ActivityContext) -> Result<ActivityOutput, ActivityError> {
        let value = serde_json::Value::from(ctx.require_input("value")?.clone());

        let rendered = if self.pretty {
            serde_json::to_string_pretty(&value)
        } else {
            serde_json::to_string(&value)
        }
        .map_err(|e| ActivityError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        Ok(ActivityOutput::new().with_output("json", rendered))
    }
}

pub struct JsonStringifyActivityFactory;

impl ActivityFactory for JsonStringifyActivityFactory {
    fn create(&self, settings: &HashMap<String, Value>) -> Result<Box<dyn Activity>, ActivityError> {
        let pretty = settings
            .get("pretty")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Ok(Box::new(JsonStringifyActivity { pretty }))
    }

    fn activity_type(&self) -> &str {
        "json.stringify"
    }

    fn metadata(&self) -> ActivityMetadata {
        ActivityMetadata {
            description: "Convert a value to a JSON string".to_string(),
            category: "transform".to_string(),
            inputs: vec![PortDefinition::required("value", "Value to render")],
            outputs: vec![PortDefinition::required("json", "JSON text")],
        }
    }
}
