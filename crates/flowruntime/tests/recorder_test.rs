// crates/flowruntime/tests/recorder_test.rs

mod common;

use common::*;
use flowcore::{FlowError, Value};
use flowruntime::{
    ActionFactory, ChannelResultHandler, InMemoryRecorder, InitContext, RecordingMode, RunContext,
    RunRequest, SNAPSHOT_RECORDING_MODE, STATE_RECORDING_MODE, STEP_RECORDING_MODE,
};
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

async fn run_with_mode(mode: &str) -> flowruntime::InstanceHistory {
    let recorder = Arc::new(InMemoryRecorder::new());
    let harness = Harness::with(|ctx| {
        ctx.with_setting(STATE_RECORDING_MODE, mode)
            .with_recorder(recorder.clone())
    });
    let action = harness.action("modes", two_task_flow()).await;

    let results = run_to_done(
        &action,
        RunContext::default(),
        RunRequest::new(inputs(&[("x", Value::Number(5.0))])),
    )
    .await;
    assert!(results[0].is_ok());

    let ids = recorder.instance_ids();
    assert_eq!(ids.len(), 1);
    recorder.history(&ids[0]).unwrap()
}

#[tokio::test]
async fn test_off_mode_persists_no_state() {
    let history = run_with_mode("off").await;

    assert_eq!(history.starts.len(), 1);
    assert!(history.initial.is_empty());
    assert!(history.steps.is_empty());
    assert_eq!(history.done.len(), 1);
}

#[tokio::test]
async fn test_step_mode_records_changes_only() {
    let history = run_with_mode("step").await;

    assert_eq!(history.initial.len(), 1);
    assert_eq!(history.steps.len(), 2);
    for record in history.initial.iter().chain(history.steps.iter()) {
        assert!(record.changes.is_some());
        assert!(record.snapshot.is_none());
    }

    let first = history.steps[0].changes.as_ref().unwrap();
    assert_eq!(first.attrs.get("doubled"), Some(&Value::Number(10.0)));
    let initial = history.initial[0].changes.as_ref().unwrap();
    assert_eq!(initial.attrs.get("x"), Some(&Value::Number(5.0)));
}

#[tokio::test]
async fn test_snapshot_mode_records_states_only() {
    let history = run_with_mode("Snapshot").await;

    assert_eq!(history.steps.len(), 2);
    for record in &history.steps {
        assert!(record.changes.is_none());
        let snapshot = record.snapshot.as_ref().unwrap();
        assert_eq!(snapshot.step_count, record.step);
    }
    assert_eq!(history.snapshot_at(0).unwrap().step_count, 0);
}

#[tokio::test]
async fn test_full_mode_records_both() {
    let history = run_with_mode("FULL").await;

    assert_eq!(history.initial.len(), 1);
    assert_eq!(history.steps.len(), 2);
    assert!(history
        .steps
        .iter()
        .all(|r| r.changes.is_some() && r.snapshot.is_some()));
}

#[tokio::test]
async fn test_recorder_failures_do_not_fail_the_run() {
    let recorder = Arc::new(CountingRecorder::failing());
    let harness = Harness::with(|ctx| {
        ctx.with_setting(STATE_RECORDING_MODE, "full")
            .with_recorder(recorder.clone())
    });
    let action = harness.action("unreliable", two_task_flow()).await;

    let results = run_to_done(
        &action,
        RunContext::default(),
        RunRequest::new(inputs(&[("x", Value::Number(5.0))])),
    )
    .await;

    assert_eq!(output(&results[0], "y"), Value::Number(10.0));
    assert_eq!(recorder.counts(), (1, 1, 2, 1));
}

#[tokio::test]
async fn test_tracer_failure_rejects_run_before_recording() {
    let recorder = Arc::new(CountingRecorder::default());
    let tracer = Arc::new(CountingTracer {
        failing: true,
        ..CountingTracer::default()
    });
    let harness = Harness::with(|ctx| {
        ctx.with_setting(STATE_RECORDING_MODE, "full")
            .with_recorder(recorder.clone())
            .with_tracer(tracer.clone())
    });
    let action = harness.action("untraceable", two_task_flow()).await;

    let (handler, mut rx) = ChannelResultHandler::new();
    let launched = action
        .run(RunContext::default(), RunRequest::default(), Arc::new(handler))
        .await;

    assert!(matches!(launched, Err(FlowError::Configuration(_))));
    assert!(rx.recv().await.is_none());
    assert_eq!(recorder.counts(), (0, 0, 0, 0));
}

#[tokio::test]
async fn test_initialize_is_idempotent() {
    init_tracing();
    let factory = ActionFactory::new();
    assert!(factory.services().is_none());

    let first = factory
        .initialize(
            InitContext::new(test_registry(Arc::new(AtomicU32::new(0)), 0))
                .with_setting(STATE_RECORDING_MODE, "step"),
        )
        .unwrap();
    let second = factory
        .initialize(
            InitContext::new(test_registry(Arc::new(AtomicU32::new(0)), 0))
                .with_setting(STATE_RECORDING_MODE, "full"),
        )
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.recording_mode(), RecordingMode::Step);
}

#[tokio::test]
async fn test_initialize_rejects_malformed_mode() {
    let factory = ActionFactory::new();
    let result = factory.initialize(
        InitContext::new(test_registry(Arc::new(AtomicU32::new(0)), 0))
            .with_setting(STATE_RECORDING_MODE, "sometimes"),
    );

    assert!(matches!(result, Err(FlowError::Configuration(_))));
    assert!(factory.services().is_none(), "a failed init can be retried");

    let retried = factory.initialize(InitContext::new(test_registry(
        Arc::new(AtomicU32::new(0)),
        0,
    )));
    assert!(retried.is_ok());
}

#[tokio::test]
async fn test_deprecated_keys_select_mode() {
    let factory = ActionFactory::new();
    let services = factory
        .initialize(
            InitContext::new(test_registry(Arc::new(AtomicU32::new(0)), 0))
                .with_setting(STEP_RECORDING_MODE, "full")
                .with_setting(SNAPSHOT_RECORDING_MODE, "full"),
        )
        .unwrap();

    assert_eq!(services.recording_mode(), RecordingMode::Full);
    assert!(services.instance_recorder(false).is_none(), "no recorder configured");
}

#[tokio::test]
async fn test_new_action_requires_initialize() {
    let factory = ActionFactory::new();
    let result = factory
        .new_action(flowruntime::ActionConfig::for_flow("res://flow:anything"))
        .await;

    assert!(matches!(result, Err(FlowError::Configuration(_))));
}
