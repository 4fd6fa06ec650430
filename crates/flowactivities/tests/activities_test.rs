// crates/flowactivities/tests/activities_test.rs

use flowactivities::{
    register_all, AddActivity, JsonParseActivity, MultiplyActivity, ThrowActivity,
};
use flowcore::{Activity, ActivityContext, ActivityError, Value};
use flowruntime::ActivityRegistry;
use std::collections::HashMap;
use std::time::Duration;

// Helper function to create a test context
fn create_test_context(
    settings: HashMap<String, Value>,
    inputs: HashMap<String, Value>,
) -> ActivityContext {
    let mut ctx = ActivityContext::new("task", "instance");
    ctx.settings = settings;
    ctx.inputs = inputs;
    ctx
}

fn map(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn registry() -> ActivityRegistry {
    let mut registry = ActivityRegistry::new();
    register_all(&mut registry);
    registry
}

#[test]
fn test_register_all() {
    let registry = registry();
    assert_eq!(
        registry.list_activity_types(),
        vec![
            "error.throw",
            "json.parse",
            "json.stringify",
            "log",
            "math.add",
            "math.multiply",
            "time.delay",
        ]
    );
    let meta = registry.get_metadata("math.multiply").unwrap();
    assert_eq!(meta.category, "math");
    assert!(meta.inputs.iter().any(|p| p.name == "value" && p.required));
}

#[tokio::test]
async fn test_multiply_uses_input_or_setting() {
    let ctx = create_test_context(
        map(&[("factor", Value::Number(3.0))]),
        map(&[("value", Value::Number(4.0))]),
    );
    let output = MultiplyActivity.eval(ctx).await.unwrap();
    assert_eq!(output.outputs["result"], Value::Number(12.0));

    let ctx = create_test_context(
        map(&[("factor", Value::Number(3.0))]),
        map(&[("value", Value::Number(4.0)), ("factor", Value::Number(0.5))]),
    );
    let output = MultiplyActivity.eval(ctx).await.unwrap();
    assert_eq!(output.outputs["result"], Value::Number(2.0));
}

#[tokio::test]
async fn test_multiply_rejects_non_numbers() {
    let ctx = create_test_context(HashMap::new(), map(&[("value", Value::from("four"))]));
    let err = MultiplyActivity.eval(ctx).await.unwrap_err();
    assert_eq!(
        err,
        ActivityError::InvalidInputType {
            field: "value".to_string(),
            expected: "number".to_string(),
            actual: "string".to_string(),
        }
    );

    let ctx = create_test_context(HashMap::new(), HashMap::new());
    let err = MultiplyActivity.eval(ctx).await.unwrap_err();
    assert_eq!(err, ActivityError::MissingInput("value".to_string()));
}

#[tokio::test]
async fn test_add_defaults_second_operand() {
    let ctx = create_test_context(HashMap::new(), map(&[("a", Value::Number(1.5))]));
    let output = AddActivity.eval(ctx).await.unwrap();
    assert_eq!(output.outputs["result"], Value::Number(1.5));
}

#[tokio::test]
async fn test_json_parse_and_stringify() {
    let ctx = create_test_context(
        HashMap::new(),
        map(&[("json", Value::from(r#"{"n": 2, "tags": ["a", "b"]}"#))]),
    );
    let parsed = JsonParseActivity.eval(ctx).await.unwrap().outputs["parsed"].clone();
    let obj = parsed.as_object().unwrap();
    assert_eq!(obj["n"], Value::Number(2.0));

    let stringify = registry()
        .create("json.stringify", &HashMap::new())
        .unwrap();
    let ctx = create_test_context(HashMap::new(), map(&[("value", Value::Number(2.0))]));
    let output = stringify.eval(ctx).await.unwrap();
    assert_eq!(output.outputs["json"], Value::from("2"));
}

#[tokio::test]
async fn test_json_parse_reports_bad_input() {
    let ctx = create_test_context(HashMap::new(), map(&[("json", Value::from("{nope"))]));
    assert!(matches!(
        JsonParseActivity.eval(ctx).await,
        Err(ActivityError::ExecutionFailed(_))
    ));

    let ctx = create_test_context(HashMap::new(), map(&[("json", Value::Bool(true))]));
    assert!(matches!(
        JsonParseActivity.eval(ctx).await,
        Err(ActivityError::InvalidInputType { .. })
    ));
}

#[tokio::test]
async fn test_throw_uses_message() {
    let ctx = create_test_context(HashMap::new(), map(&[("message", Value::from("bad order"))]));
    assert_eq!(
        ThrowActivity.eval(ctx).await.unwrap_err(),
        ActivityError::ExecutionFailed("bad order".to_string())
    );
}

#[tokio::test]
async fn test_delay_passes_inputs_through() {
    let delay = registry()
        .create("time.delay", &map(&[("delayMs", Value::Number(5.0))]))
        .unwrap();
    let ctx = create_test_context(HashMap::new(), map(&[("payload", Value::from("kept"))]));
    let output = delay.eval(ctx).await.unwrap();
    assert_eq!(output.outputs["payload"], Value::from("kept"));
}

#[tokio::test]
async fn test_delay_honours_cancellation() {
    let delay = registry()
        .create("time.delay", &map(&[("delayMs", Value::Number(60_000.0))]))
        .unwrap();
    let ctx = create_test_context(HashMap::new(), HashMap::new());
    let token = ctx.cancellation.clone();

    let handle = tokio::spawn(async move { delay.eval(ctx).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("delay should stop on cancellation")
        .unwrap();
    assert_eq!(result.unwrap_err(), ActivityError::Cancelled);
}

#[test]
fn test_factories_validate_settings() {
    let registry = registry();
    assert!(matches!(
        registry.create("time.delay", &map(&[("delayMs", Value::from("soon"))])),
        Err(ActivityError::Configuration(_))
    ));
    assert!(matches!(
        registry.create("log", &map(&[("level", Value::from("loud"))])),
        Err(ActivityError::Configuration(_))
    ));
    assert!(registry
        .create("log", &map(&[("level", Value::from("warn"))]))
        .is_ok());
    assert!(matches!(
        registry.create("nope", &HashMap::new()),
        Err(ActivityError::UnknownActivity(_))
    ));
}

#[test]
fn test_unmapped_required_inputs_are_reported() {
    let registry = registry();

    let bare = flowcore::TaskSpec::new("total", "math.multiply");
    assert_eq!(registry.unmapped_inputs(&bare), vec!["value"]);

    let mapped = flowcore::TaskSpec::new("total", "math.multiply").with_input("value", "$.price");
    assert!(registry.unmapped_inputs(&mapped).is_empty());

    let log = flowcore::TaskSpec::new("say", "log");
    assert!(registry.unmapped_inputs(&log).is_empty());
}
