use async_trait::async_trait;
use flowcore::{Activity, ActivityContext, ActivityError, ActivityOutput, Value};
use flowruntime::{ActivityFactory, ActivityMetadata, PortDefinition};
use std::collections::HashMap;

/// Operand from the inputs, falling back to a numeric setting of the same name.
fn operand(ctx: &ActivityContext, name: &str, default: Option<f64>) -> Result<f64, ActivityError> {
    if ctx.inputs.contains_key(name) {
        return ctx.require_number(name);
    }
    match ctx.settings.get(name) {
        Some(value) => value.as_f64().ok_or_else(|| ActivityError::InvalidInputType {
            field: name.to_string(),
            expected: "number".to_string(),
            actual: value.type_name().to_string(),
        }),
        None => default.ok_or_else(|| ActivityError::MissingInput(name.to_string())),
    }
}

/// `result = value * factor`
pub struct MultiplyActivity;

#[async_trait]
impl Activity for MultiplyActivity {
    fn activity_type(&self) -> &str {
        "math.multiply"
    }

    async fn eval(&self, ctx: ActivityContext) -> Result<ActivityOutput, ActivityError> {
        let value = operand(&ctx, "value", None)?;
        let factor = operand(&ctx, "factor", Some(1.0))?;
        Ok(ActivityOutput::new().with_output("result", value * factor))
    }
}

pub struct MultiplyActivityFactory;

impl ActivityFactory for MultiplyActivityFactory {
    fn create(&self, _settings: &HashMap<String, Value>) -> Result<Box<dyn Activity>, ActivityError> {
        Ok(Box::new(MultiplyActivity))
    }

    fn activity_type(&self) -> &str {
        "math.multiply"
    }

    fn metadata(&self) -> ActivityMetadata {
        ActivityMetadata {
            description: "Multiply a number by a factor".to_string(),
            category: "math".to_string(),
            inputs: vec![
                PortDefinition::required("value", "Number to multiply"),
                PortDefinition::optional("factor", "Multiplier, input or setting (default 1)"),
            ],
            outputs: vec![PortDefinition::required("result", "Product")],
        }
    }
}

/// `result = a + b`
pub struct AddActivity;

#[async_trait]
impl Activity for AddActivity {
    fn activity_type(&self) -> &str {
        "math.add"
    }

    async fn eval(&self, ctx: ActivityContext) -> Result<ActivityOutput, ActivityError> {
        let a = operand(&ctx, "a", None)?;
        let b = operand(&ctx, "b", Some(0.0))?;
        Ok(ActivityOutput::new().with_output("result", a + b))
    }
}

pub struct AddActivityFactory;

impl ActivityFactory for AddActivityFactory {
    fn create(&self, _settings: &HashMap<String, Value>) -> Result<Box<dyn Activity>, ActivityError> {
        Ok(Box::new(AddActivity))
    }

    fn activity_type(&self) -> &str {
        "math.add"
    }

    fn metadata(&self) -> ActivityMetadata {
        ActivityMetadata {
            description: "Add two numbers".to_string(),
            category: "math".to_string(),
            inputs: vec![
                PortDefinition::required("a", "First operand"),
                PortDefinition::optional("b", "Second operand (default 0)"),
            ],
            outputs: vec![PortDefinition::required("result", "Sum")],
        }
    }
}
