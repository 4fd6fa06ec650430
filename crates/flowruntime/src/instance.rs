//! The mutable state machine for one flow run.

use crate::mapper;
use crate::model::{StepModel, TaskStatus};
use crate::recorder::InstanceRecorder;
use crate::registry::ActivityRegistry;
use crate::tracer::{SpanConfig, TraceContext};
use chrono::{DateTime, Utc};
use flowcore::{
    ActivityContext, ActivityError, ErrorHandling, ExecutionError, FlowDefinition, FlowError,
    TaskId, TaskSpec, Value,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Run status; ordered so that `status < Completed` means still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlowStatus {
    Active,
    Completed,
    Failed,
}

impl FlowStatus {
    pub fn is_terminal(self) -> bool {
        self >= FlowStatus::Completed
    }
}

/// Attribute and task changes made by the latest step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepChanges {
    pub attrs: HashMap<String, Value>,
    pub tasks: HashMap<TaskId, TaskStatus>,
}

impl StepChanges {
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty() && self.tasks.is_empty()
    }
}

/// Serializable form of an instance, used to persist, restart and resume runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceState {
    pub id: String,
    pub flow_uri: String,
    pub status: FlowStatus,
    pub step_count: u64,
    #[serde(default)]
    pub attrs: HashMap<String, Value>,
    #[serde(default)]
    pub tasks: HashMap<TaskId, TaskStatus>,
    #[serde(default)]
    pub work_queue: VecDeque<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Execution-time overrides applied to an instance before it runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecOptions {
    /// Attribute values that replace whatever the inputs supplied.
    pub attrs: HashMap<String, Value>,
    /// Per-task patches keyed by task id.
    pub patches: HashMap<TaskId, TaskPatch>,
}

/// Replaces the evaluation of one task.
///
/// With `outputs` the task completes with those outputs and its activity
/// never runs; with only `skip` it is marked skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPatch {
    pub skip: bool,
    pub outputs: Option<HashMap<String, Value>>,
}

/// Registries an instance needs to evaluate its tasks.
#[derive(Clone)]
pub struct InstanceEnv {
    pub activities: Arc<ActivityRegistry>,
    pub model: Arc<dyn StepModel>,
}

enum TaskOutcome {
    Done(HashMap<String, Value>),
    Skipped,
}

pub struct Instance {
    id: String,
    flow_uri: String,
    definition: Arc<FlowDefinition>,
    env: InstanceEnv,
    status: FlowStatus,
    step_count: u64,
    attrs: HashMap<String, Value>,
    tasks: HashMap<TaskId, TaskStatus>,
    work_queue: VecDeque<TaskId>,
    error: Option<ExecutionError>,
    changes: StepChanges,
    patches: HashMap<TaskId, TaskPatch>,
    tracing_context: Option<TraceContext>,
    recorder: Option<InstanceRecorder>,
    span: tracing::Span,
    cancellation: CancellationToken,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
}

impl Instance {
    pub fn new(
        id: impl Into<String>,
        flow_uri: impl Into<String>,
        definition: Arc<FlowDefinition>,
        env: InstanceEnv,
        span: tracing::Span,
    ) -> Self {
        let tasks = definition
            .tasks
            .iter()
            .map(|t| (t.id.clone(), TaskStatus::NotStarted))
            .collect();

        Self {
            id: id.into(),
            flow_uri: flow_uri.into(),
            definition,
            env,
            status: FlowStatus::Active,
            step_count: 0,
            attrs: HashMap::new(),
            tasks,
            work_queue: VecDeque::new(),
            error: None,
            changes: StepChanges::default(),
            patches: HashMap::new(),
            tracing_context: None,
            recorder: None,
            span,
            cancellation: CancellationToken::new(),
            start_time: Utc::now(),
            end_time: None,
        }
    }

    /// Rebuild an instance from persisted state.
    pub fn from_state(
        state: InstanceState,
        definition: Arc<FlowDefinition>,
        env: InstanceEnv,
        span: tracing::Span,
    ) -> Self {
        let mut inst = Self::new(state.id, state.flow_uri, definition, env, span);
        inst.status = state.status;
        inst.step_count = state.step_count;
        inst.attrs = state.attrs;
        inst.tasks.extend(state.tasks);
        inst.work_queue = state.work_queue;
        inst.error = state.error.map(ExecutionError::Restored);
        inst
    }

    pub fn to_state(&self) -> InstanceState {
        InstanceState {
            id: self.id.clone(),
            flow_uri: self.flow_uri.clone(),
            status: self.status,
            step_count: self.step_count,
            attrs: self.attrs.clone(),
            tasks: self.tasks.clone(),
            work_queue: self.work_queue.clone(),
            error: self.error.as_ref().map(|e| e.to_string()),
        }
    }

    /// Logging span scoping every log line of one instance.
    pub fn logging_span(flow_name: &str, instance_id: &str, event_id: Option<&str>) -> tracing::Span {
        tracing::info_span!(
            "flow_instance",
            flow_name = %flow_name,
            flow_id = %instance_id,
            event_id = event_id.unwrap_or(""),
        )
    }

    /// Seed attributes from declared defaults and `inputs`, then schedule
    /// the model's entry tasks.
    pub fn start(&mut self, inputs: HashMap<String, Value>) {
        let definition = self.definition.clone();
        for attr in &definition.metadata.input {
            if let Some(value) = &attr.value {
                self.set_attr(attr.name.clone(), value.clone());
            }
        }
        self.update_attrs(inputs);

        for task_id in self.env.model.entry_tasks(&definition) {
            self.schedule(task_id);
        }
        tracing::debug!(parent: &self.span, queued = self.work_queue.len(), "instance started");
    }

    /// Merge inputs into the attribute bag without touching status or steps.
    pub fn update_attrs(&mut self, inputs: HashMap<String, Value>) {
        for (name, value) in inputs {
            self.set_attr(name, value);
        }
    }

    /// Re-identify a reconstructed instance so it runs again from `base_step`.
    ///
    /// Failed tasks are queued again and a failed status is reset, since the
    /// result is a new run with its own id.
    pub fn restart(
        mut self,
        new_id: impl Into<String>,
        base_step: u64,
        span: tracing::Span,
    ) -> Result<Instance, FlowError> {
        let never_ran = self.attrs.is_empty()
            && self.work_queue.is_empty()
            && self.tasks.values().all(|s| *s == TaskStatus::NotStarted);
        if never_ran {
            return Err(FlowError::Precondition(format!(
                "instance {} has no state to restart from",
                self.id
            )));
        }

        self.id = new_id.into();
        self.span = span;
        self.step_count = base_step;

        if self.status != FlowStatus::Active {
            self.status = FlowStatus::Active;
            self.error = None;
            self.end_time = None;
        }

        let mut failed: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|(_, s)| **s == TaskStatus::Failed)
            .map(|(id, _)| id.clone())
            .collect();
        failed.sort();
        for task_id in failed.into_iter().rev() {
            self.tasks.insert(task_id.clone(), TaskStatus::Ready);
            if !self.work_queue.contains(&task_id) {
                self.work_queue.push_front(task_id);
            }
        }

        tracing::debug!(parent: &self.span, base_step, "instance restarted");
        Ok(self)
    }

    pub fn apply_exec_options(&mut self, options: &ExecOptions) {
        for (name, value) in &options.attrs {
            self.set_attr(name.clone(), value.clone());
        }
        self.patches.extend(options.patches.clone());
    }

    /// Advance by one unit of scheduled work.
    ///
    /// Returns `false` once nothing is left to schedule: the instance is
    /// then either completed or failed.
    pub async fn do_step(&mut self) -> bool {
        self.changes = StepChanges::default();

        if self.status != FlowStatus::Active {
            return false;
        }

        let Some(task_id) = self.work_queue.pop_front() else {
            self.complete();
            return false;
        };

        let definition = self.definition.clone();
        let Some(task) = definition.find_task(&task_id) else {
            self.fail(ExecutionError::TaskFailed {
                task: task_id.clone(),
                source: ActivityError::Configuration(format!(
                    "task '{}' is not part of flow '{}'",
                    task_id, definition.name
                )),
            });
            return false;
        };

        tracing::debug!(parent: &self.span, task = %task.display_name(), activity = %task.activity, "evaluating task");

        match self.eval_task(task).await {
            Ok(TaskOutcome::Done(outputs)) => {
                self.apply_outputs(task, outputs);
                self.set_task_status(&task_id, TaskStatus::Done);
            }
            Ok(TaskOutcome::Skipped) => {
                self.set_task_status(&task_id, TaskStatus::Skipped);
            }
            Err(ActivityError::Cancelled) => {
                // Re-queued so a restarted run evaluates the task again.
                self.work_queue.push_front(task_id.clone());
                self.fail(ExecutionError::Cancelled {
                    step: self.step_count,
                });
                return false;
            }
            Err(e) => {
                self.set_task_status(&task_id, TaskStatus::Failed);
                match definition.settings.on_error {
                    ErrorHandling::StopFlow => {
                        tracing::error!(parent: &self.span, task = %task_id, "task failed: {}", e);
                        self.fail(ExecutionError::TaskFailed {
                            task: task_id,
                            source: e,
                        });
                        return false;
                    }
                    ErrorHandling::ContinueOnError => {
                        tracing::warn!(parent: &self.span, task = %task_id, "task failed, continuing: {}", e);
                    }
                }
            }
        }

        for next in self
            .env
            .model
            .ready_after(&definition, &task_id, &self.tasks)
        {
            self.schedule(next);
        }

        if self.work_queue.is_empty() {
            self.complete();
            return false;
        }
        true
    }

    async fn eval_task(&self, task: &TaskSpec) -> Result<TaskOutcome, ActivityError> {
        if let Some(patch) = self.patches.get(&task.id) {
            if let Some(outputs) = &patch.outputs {
                return Ok(TaskOutcome::Done(outputs.clone()));
            }
            if patch.skip {
                return Ok(TaskOutcome::Skipped);
            }
        }

        let inputs = mapper::resolve_inputs(&task.input, &self.attrs)?;
        let activity = self.env.activities.create(&task.activity, &task.settings)?;

        let policy = task.retry.clone().unwrap_or(flowcore::RetryPolicy {
            max_attempts: 1,
            delay_ms: 0,
            backoff_multiplier: 1.0,
        });
        let max_attempts = policy.max_attempts.max(1);
        let mut delay_ms = policy.delay_ms;
        let mut attempt = 1;

        loop {
            let ctx = ActivityContext {
                task_id: task.id.clone(),
                instance_id: self.id.clone(),
                inputs: inputs.clone(),
                settings: task.settings.clone(),
                cancellation: self.cancellation.clone(),
            };

            let result = match self.definition.settings.task_timeout_ms {
                Some(millis) => timeout(Duration::from_millis(millis), activity.eval(ctx))
                    .await
                    .unwrap_or(Err(ActivityError::Timeout { millis })),
                None => activity.eval(ctx).await,
            };

            match result {
                Ok(output) => return Ok(TaskOutcome::Done(output.outputs)),
                Err(ActivityError::Cancelled) => return Err(ActivityError::Cancelled),
                Err(e) if attempt < max_attempts => {
                    tracing::warn!(
                        parent: &self.span,
                        task = %task.id,
                        attempt,
                        max_attempts,
                        "task attempt failed, retrying in {}ms: {}",
                        delay_ms,
                        e
                    );
                    tokio::select! {
                        _ = sleep(Duration::from_millis(delay_ms)) => {}
                        _ = self.cancellation.cancelled() => return Err(ActivityError::Cancelled),
                    }
                    attempt += 1;
                    delay_ms = (delay_ms as f64 * policy.backoff_multiplier) as u64;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn apply_outputs(&mut self, task: &TaskSpec, outputs: HashMap<String, Value>) {
        for (name, attr) in &task.output {
            if let Some(value) = outputs.get(name) {
                self.set_attr(attr.clone(), value.clone());
            }
        }
        for (name, value) in outputs {
            self.set_attr(mapper::activity_attr(&task.id, &name), value);
        }
    }

    fn schedule(&mut self, task_id: TaskId) {
        self.set_task_status(&task_id, TaskStatus::Ready);
        self.work_queue.push_back(task_id);
    }

    fn set_attr(&mut self, name: String, value: Value) {
        self.changes.attrs.insert(name.clone(), value.clone());
        self.attrs.insert(name, value);
    }

    fn set_task_status(&mut self, task_id: &str, status: TaskStatus) {
        self.changes.tasks.insert(task_id.to_string(), status);
        self.tasks.insert(task_id.to_string(), status);
    }

    fn complete(&mut self) {
        if self.status != FlowStatus::Active {
            return;
        }
        self.status = FlowStatus::Completed;
        self.end_time = Some(Utc::now());
    }

    /// Transition to `Failed`; ignored once the instance is terminal.
    pub fn fail(&mut self, error: ExecutionError) {
        if self.status != FlowStatus::Active {
            return;
        }
        self.status = FlowStatus::Failed;
        self.error = Some(error);
        self.end_time = Some(Utc::now());
    }

    pub fn advance_step(&mut self) -> u64 {
        self.step_count += 1;
        self.step_count
    }

    /// Declared flow outputs; only valid once completed.
    pub fn return_data(&self) -> Result<HashMap<String, Value>, FlowError> {
        if self.status != FlowStatus::Completed {
            return Err(FlowError::Precondition(format!(
                "instance {} has not completed",
                self.id
            )));
        }

        let mut outputs = HashMap::new();
        for attr in &self.definition.metadata.output {
            if let Some(value) = self.attrs.get(&attr.name).or(attr.value.as_ref()) {
                outputs.insert(attr.name.clone(), value.clone());
            }
        }
        Ok(outputs)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn flow_uri(&self) -> &str {
        &self.flow_uri
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &Arc<FlowDefinition> {
        &self.definition
    }

    pub fn status(&self) -> FlowStatus {
        self.status
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn attrs(&self) -> &HashMap<String, Value> {
        &self.attrs
    }

    pub fn task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks.get(task_id).copied()
    }

    pub fn changes(&self) -> &StepChanges {
        &self.changes
    }

    /// Failure cause; only set once failed.
    pub fn error(&self) -> Option<&ExecutionError> {
        self.error.as_ref()
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn span_config(&self) -> SpanConfig {
        let mut tags = HashMap::new();
        tags.insert("flow_id".to_string(), self.id.clone());
        tags.insert("flow_uri".to_string(), self.flow_uri.clone());
        SpanConfig {
            name: self.definition.name.clone(),
            operation: "flow".to_string(),
            tags,
        }
    }

    pub fn set_tracing_context(&mut self, context: TraceContext) {
        if self.tracing_context.is_some() {
            tracing::warn!(parent: &self.span, "tracing context already set, keeping the first one");
            return;
        }
        self.tracing_context = Some(context);
    }

    pub fn tracing_context(&self) -> Option<&TraceContext> {
        self.tracing_context.as_ref()
    }

    /// Take the tracing context so the span can be finished exactly once.
    pub fn take_tracing_context(&mut self) -> Option<TraceContext> {
        self.tracing_context.take()
    }

    pub fn set_instance_recorder(&mut self, recorder: Option<InstanceRecorder>) {
        self.recorder = recorder;
    }

    pub fn instance_recorder(&self) -> Option<&InstanceRecorder> {
        self.recorder.as_ref()
    }

    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancellation = token;
    }

    pub fn update_start_time(&mut self) {
        self.start_time = Utc::now();
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Time from start to the terminal transition, or to now while running.
    pub fn execution_time(&self) -> Duration {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).to_std().unwrap_or_default()
    }
}
