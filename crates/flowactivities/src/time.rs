use async_trait::async_trait;
use flowcore::{Activity, ActivityContext, ActivityError, ActivityOutput, Value};
use flowruntime::{ActivityFactory, ActivityMetadata, PortDefinition};
use std::collections::HashMap;
use tokio::time::{sleep, Duration};

const DEFAULT_DELAY_MS: u64 = 1000;

/// Waits for `delayMs`, then passes its inputs through unchanged
pub struct DelayActivity {
    delay_ms: u64,
}

#[async_trait]
impl Activity for DelayActivity {
    fn activity_type(&self) -> &str {
        "time.delay"
    }

    async fn eval(&self, ctx: ActivityContext) -> Result<ActivityOutput, ActivityError> {
        tracing::debug!(task = %ctx.task_id, "Delaying for {}ms", self.delay_ms);

        tokio::select! {
            _ = sleep(Duration::from_millis(self.delay_ms)) => {}
            _ = ctx.cancellation.cancelled() => return Err(ActivityError::Cancelled),
        }

        Ok(ActivityOutput {
            outputs: ctx.inputs,
        })
    }
}

pub struct DelayActivityFactory;

impl ActivityFactory for DelayActivityFactory {
    fn create(&self, settings: &HashMap<String, Value>) -> Result<Box<dyn Activity>, ActivityError> {
        let delay_ms = match settings.get("delayMs") {
            None => DEFAULT_DELAY_MS,
            Some(value) => value
                .as_f64()
                .filter(|ms| *ms >= 0.0)
                .map(|ms| ms as u64)
                .ok_or_else(|| {
                    ActivityError::Configuration(format!(
                        "delayMs must be a non-negative number, got {}",
                        value.type_name()
                    ))
                })?,
        };
        Ok(Box::new(DelayActivity { delay_ms }))
    }

    fn activity_type(&self) -> &str {
        "time.delay"
    }

    fn metadata(&self) -> ActivityMetadata {
        ActivityMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
            inputs: vec![],
            outputs: vec![],
        }
    }
}
