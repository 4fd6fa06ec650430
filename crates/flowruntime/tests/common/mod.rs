// crates/flowruntime/tests/common/mod.rs

#![allow(dead_code)]

use async_trait::async_trait;
use flowcore::{
    Activity, ActivityContext, ActivityError, ActivityOutput, ExecutionError, FlowDefinition,
    FlowError, TaskSpec, Value,
};
use flowruntime::{
    collect_results, ActionConfig, ActionFactory, ActivityFactory, ActivityRegistry,
    ChannelResultHandler, FlowAction, FlowManager, FlowState, HandlerEvent, InitContext,
    RecorderError, RunContext, RunOutput, RunRequest, SpanConfig, StateRecord, StateRecorder,
    TraceContext, Tracer,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

pub fn inputs(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Activities
// ---------------------------------------------------------------------------

/// `math.multiply`: `result = value * factor`, factor from input or setting.
struct Multiply;

#[async_trait]
impl Activity for Multiply {
    fn activity_type(&self) -> &str {
        "math.multiply"
    }

    async fn eval(&self, ctx: ActivityContext) -> Result<ActivityOutput, ActivityError> {
        let value = ctx.require_number("value")?;
        let factor = match ctx.inputs.get("factor") {
            Some(v) => v.as_f64().unwrap_or(1.0),
            None => ctx.setting_or("factor", Value::Number(1.0)).as_f64().unwrap_or(1.0),
        };
        Ok(ActivityOutput::new().with_output("result", value * factor))
    }
}

/// `test.echo`: copies input `value` to output `value`.
struct Echo;

#[async_trait]
impl Activity for Echo {
    fn activity_type(&self) -> &str {
        "test.echo"
    }

    async fn eval(&self, ctx: ActivityContext) -> Result<ActivityOutput, ActivityError> {
        let value = ctx.inputs.get("value").cloned().unwrap_or_default();
        Ok(ActivityOutput::new().with_output("value", value))
    }
}

/// `test.fail`: always fails with the `message` setting.
struct Fail;

#[async_trait]
impl Activity for Fail {
    fn activity_type(&self) -> &str {
        "test.fail"
    }

    async fn eval(&self, ctx: ActivityContext) -> Result<ActivityOutput, ActivityError> {
        let message = ctx
            .setting_or("message", Value::from("boom"))
            .coerce_to_string()
            .unwrap_or_default();
        Err(ActivityError::ExecutionFailed(message))
    }
}

/// `test.slow`: sleeps `millis`, giving up when the run is cancelled.
struct Slow;

#[async_trait]
impl Activity for Slow {
    fn activity_type(&self) -> &str {
        "test.slow"
    }

    async fn eval(&self, ctx: ActivityContext) -> Result<ActivityOutput, ActivityError> {
        let millis = ctx.setting_or("millis", Value::Number(5_000.0)).as_f64().unwrap_or(0.0) as u64;
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(millis)) => {
                Ok(ActivityOutput::new().with_output("slept", millis as f64))
            }
            _ = ctx.cancellation.cancelled() => Err(ActivityError::Cancelled),
        }
    }
}

/// `test.flaky`: fails until it has been evaluated `fail_times` times.
struct Flaky {
    calls: Arc<AtomicU32>,
    fail_times: u32,
}

#[async_trait]
impl Activity for Flaky {
    fn activity_type(&self) -> &str {
        "test.flaky"
    }

    async fn eval(&self, _ctx: ActivityContext) -> Result<ActivityOutput, ActivityError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_times {
            return Err(ActivityError::ExecutionFailed(format!("attempt {} failed", call)));
        }
        Ok(ActivityOutput::new().with_output("attempts", call as f64))
    }
}

struct SimpleFactory<F> {
    activity_type: &'static str,
    make: F,
}

impl<F> ActivityFactory for SimpleFactory<F>
where
    F: Fn() -> Box<dyn Activity> + Send + Sync,
{
    fn create(&self, _settings: &HashMap<String, Value>) -> Result<Box<dyn Activity>, ActivityError> {
        Ok((self.make)())
    }

    fn activity_type(&self) -> &str {
        self.activity_type
    }
}

/// Registry with every test activity. `flaky_calls` counts `test.flaky` evaluations.
pub fn test_registry(flaky_calls: Arc<AtomicU32>, flaky_fail_times: u32) -> ActivityRegistry {
    let mut registry = ActivityRegistry::new();
    registry.register(Arc::new(SimpleFactory {
        activity_type: "math.multiply",
        make: || Box::new(Multiply) as Box<dyn Activity>,
    }));
    registry.register(Arc::new(SimpleFactory {
        activity_type: "test.echo",
        make: || Box::new(Echo) as Box<dyn Activity>,
    }));
    registry.register(Arc::new(SimpleFactory {
        activity_type: "test.fail",
        make: || Box::new(Fail) as Box<dyn Activity>,
    }));
    registry.register(Arc::new(SimpleFactory {
        activity_type: "test.slow",
        make: || Box::new(Slow) as Box<dyn Activity>,
    }));
    registry.register(Arc::new(SimpleFactory {
        activity_type: "test.flaky",
        make: move || {
            Box::new(Flaky {
                calls: flaky_calls.clone(),
                fail_times: flaky_fail_times,
            }) as Box<dyn Activity>
        },
    }));
    registry
}

// ---------------------------------------------------------------------------
// Flows
// ---------------------------------------------------------------------------

/// `double` (x * 2) then `echo`, producing `y`.
pub fn two_task_flow() -> FlowDefinition {
    let mut def = FlowDefinition::new("two-task").with_input("x").with_output("y");
    def.add_task(
        TaskSpec::new("double", "math.multiply")
            .with_input("value", "$.x")
            .with_setting("factor", 2.0)
            .with_output("result", "doubled"),
    );
    def.add_task(
        TaskSpec::new("echo", "test.echo")
            .with_input("value", "$activity[double].result")
            .with_output("value", "y"),
    );
    def.link("double", "echo");
    def
}

/// `boom` always fails; `after` depends on it.
pub fn failing_flow() -> FlowDefinition {
    let mut def = FlowDefinition::new("failing").with_output("y");
    def.add_task(TaskSpec::new("boom", "test.fail").with_setting("message", "kaput"));
    def.add_task(
        TaskSpec::new("after", "test.echo")
            .with_input("value", "reached")
            .with_output("value", "y"),
    );
    def.link("boom", "after");
    def
}

/// A single slow task followed by an echo.
pub fn slow_flow(millis: f64) -> FlowDefinition {
    let mut def = FlowDefinition::new("slow").with_output("y");
    def.add_task(TaskSpec::new("wait", "test.slow").with_setting("millis", millis));
    def.add_task(
        TaskSpec::new("echo", "test.echo")
            .with_input("value", "$activity[wait].slept")
            .with_output("value", "y"),
    );
    def.link("wait", "echo");
    def
}

// ---------------------------------------------------------------------------
// Recorder and tracer doubles
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CountingRecorder {
    pub starts: AtomicUsize,
    pub initials: AtomicUsize,
    pub states: AtomicUsize,
    pub dones: AtomicUsize,
    pub steps: Mutex<Vec<StateRecord>>,
    pub done_states: Mutex<Vec<FlowState>>,
    /// Every call fails when set.
    pub failing: bool,
}

impl CountingRecorder {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn counts(&self) -> (usize, usize, usize, usize) {
        (
            self.starts.load(Ordering::SeqCst),
            self.initials.load(Ordering::SeqCst),
            self.states.load(Ordering::SeqCst),
            self.dones.load(Ordering::SeqCst),
        )
    }

    pub fn recorded_steps(&self) -> Vec<u64> {
        self.steps.lock().unwrap().iter().map(|r| r.step).collect()
    }

    fn outcome(&self) -> Result<(), RecorderError> {
        if self.failing {
            return Err(RecorderError::Unavailable("recorder offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StateRecorder for CountingRecorder {
    async fn record_start(&self, _state: FlowState) -> Result<(), RecorderError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.outcome()
    }

    async fn record_initial(&self, _record: StateRecord) -> Result<(), RecorderError> {
        self.initials.fetch_add(1, Ordering::SeqCst);
        self.outcome()
    }

    async fn record_state(&self, record: StateRecord) -> Result<(), RecorderError> {
        self.states.fetch_add(1, Ordering::SeqCst);
        self.steps.lock().unwrap().push(record);
        self.outcome()
    }

    async fn record_done(&self, state: FlowState) -> Result<(), RecorderError> {
        self.dones.fetch_add(1, Ordering::SeqCst);
        self.done_states.lock().unwrap().push(state);
        self.outcome()
    }
}

#[derive(Default)]
pub struct CountingTracer {
    pub started: AtomicUsize,
    pub finished: Mutex<Vec<Option<ExecutionError>>>,
    pub parents: Mutex<Vec<Option<String>>>,
    /// `start_trace` fails when set.
    pub failing: bool,
}

impl Tracer for CountingTracer {
    fn start_trace(
        &self,
        config: &SpanConfig,
        parent: Option<&TraceContext>,
    ) -> Result<TraceContext, FlowError> {
        if self.failing {
            return Err(FlowError::Configuration("tracer unavailable".to_string()));
        }
        self.started.fetch_add(1, Ordering::SeqCst);
        self.parents
            .lock()
            .unwrap()
            .push(parent.map(|p| p.trace_id.clone()));
        Ok(TraceContext::new(
            parent.map(|p| p.trace_id.clone()).unwrap_or_else(|| "trace".to_string()),
            config.name.clone(),
            parent.map(|p| p.span_id.clone()),
            tracing::Span::none(),
        ))
    }

    fn finish_trace(
        &self,
        _context: TraceContext,
        error: Option<&ExecutionError>,
    ) -> Result<(), FlowError> {
        self.finished.lock().unwrap().push(error.cloned());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Launch helpers
// ---------------------------------------------------------------------------

pub struct Harness {
    pub factory: ActionFactory,
    pub manager: Arc<FlowManager>,
    pub flaky_calls: Arc<AtomicU32>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(|ctx| ctx)
    }

    /// Build a harness, letting the test customize the init context.
    pub fn with(configure: impl FnOnce(InitContext) -> InitContext) -> Self {
        Self::with_flaky(2, configure)
    }

    pub fn with_flaky(
        flaky_fail_times: u32,
        configure: impl FnOnce(InitContext) -> InitContext,
    ) -> Self {
        init_tracing();
        let flaky_calls = Arc::new(AtomicU32::new(0));
        let manager = Arc::new(FlowManager::new());
        let ctx = InitContext::new(test_registry(flaky_calls.clone(), flaky_fail_times))
            .with_resolver(manager.clone());
        let factory = ActionFactory::new();
        factory
            .initialize(configure(ctx))
            .expect("engine services should initialize");
        Self {
            factory,
            manager,
            flaky_calls,
        }
    }

    pub async fn action(&self, id: &str, def: FlowDefinition) -> FlowAction {
        let uri = self
            .manager
            .register_resource(id, def)
            .await
            .expect("definition should register");
        self.factory
            .new_action(ActionConfig::for_flow(uri))
            .await
            .expect("action should build")
    }
}

/// Launch a run and wait for its handler to see `done`.
pub async fn run_to_done(
    action: &FlowAction,
    ctx: RunContext,
    request: RunRequest,
) -> Vec<Result<RunOutput, FlowError>> {
    let (handler, mut rx) = ChannelResultHandler::new();
    action
        .run(ctx, request, Arc::new(handler))
        .await
        .expect("run should launch");
    tokio::time::timeout(Duration::from_secs(10), collect_results(&mut rx))
        .await
        .expect("run should finish")
}

/// Launch a run and hand back the raw handler channel.
pub async fn launch(
    action: &FlowAction,
    ctx: RunContext,
    request: RunRequest,
) -> Result<UnboundedReceiver<HandlerEvent>, FlowError> {
    let (handler, rx) = ChannelResultHandler::new();
    action.run(ctx, request, Arc::new(handler)).await?;
    Ok(rx)
}

pub fn output(result: &Result<RunOutput, FlowError>, name: &str) -> Value {
    match result {
        Ok(outputs) => outputs.get(name).cloned().unwrap_or_default(),
        Err(e) => panic!("expected outputs, got error: {}", e),
    }
}
