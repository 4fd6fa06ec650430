//! The flow action: validates a run request, builds or reconstructs the
//! instance and launches its step loop on a separate task.

use crate::handler::{DoneGuard, ResultHandler};
use crate::instance::{ExecOptions, Instance, InstanceState};
use crate::recorder::FlowState;
use crate::runtime::{EngineServices, InitContext};
use crate::scheduler::StepScheduler;
use crate::tracer::TraceContext;
use flowcore::{FlowDefinition, FlowError, IoMetadata, Value};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Reserved input key that may carry [`RunOptions`]; stripped before execution.
pub const RUN_OPTIONS_KEY: &str = "_run_options";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunOp {
    #[default]
    Start,
    Restart,
    Resume,
}

/// Per-invocation directive for [`FlowAction::run`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunOptions {
    pub op: RunOp,
    /// Deliver `{"id": ..}` to the handler as soon as the run launches.
    pub return_id: bool,
    pub preserved_instance_id: Option<String>,
    /// Persisted instance; required for restart and resume.
    pub initial_state: Option<InstanceState>,
    /// Overrides the action's own flow URI.
    pub flow_uri: Option<String>,
    pub exec_options: Option<ExecOptions>,
    /// Step to restart from; steps are numbered from 1.
    pub init_step_id: u64,
    /// Replace recorded history instead of appending to it.
    pub rerun: bool,
}

impl RunOptions {
    pub fn restart(state: InstanceState, init_step_id: u64) -> Self {
        Self {
            op: RunOp::Restart,
            initial_state: Some(state),
            init_step_id,
            ..Self::default()
        }
    }

    pub fn resume(state: InstanceState) -> Self {
        Self {
            op: RunOp::Resume,
            initial_state: Some(state),
            ..Self::default()
        }
    }
}

/// Inputs plus options for one launch.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub inputs: HashMap<String, Value>,
    pub options: RunOptions,
}

impl RunRequest {
    pub fn new(inputs: HashMap<String, Value>) -> Self {
        Self {
            inputs,
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Split the reserved [`RUN_OPTIONS_KEY`] out of a plain input map.
    pub fn from_inputs(mut inputs: HashMap<String, Value>) -> Result<Self, FlowError> {
        let options = match inputs.remove(RUN_OPTIONS_KEY) {
            Some(raw) => serde_json::from_value(serde_json::Value::from(raw)).map_err(|e| {
                FlowError::Configuration(format!("invalid {}: {}", RUN_OPTIONS_KEY, e))
            })?,
            None => RunOptions::default(),
        };
        Ok(Self { inputs, options })
    }
}

/// Inbound call context of a launch.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Id of the trigger event that caused the run, for log correlation.
    pub event_id: Option<String>,
    /// Tracing context extracted from the inbound call.
    pub trace_parent: Option<TraceContext>,
    pub cancellation: CancellationToken,
}

impl RunContext {
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }
}

/// Action settings schema.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(rename = "flowURI", alias = "flowUri")]
    pub flow_uri: String,
}

#[derive(Debug, Clone)]
pub struct ActionConfig {
    pub id: Option<String>,
    pub settings: serde_json::Value,
}

impl ActionConfig {
    pub fn for_flow(flow_uri: impl Into<String>) -> Self {
        Self {
            id: None,
            settings: serde_json::json!({ "flowURI": flow_uri.into() }),
        }
    }
}

/// Builds flow actions over process-wide services that are initialized once.
#[derive(Default)]
pub struct ActionFactory {
    services: OnceCell<Arc<EngineServices>>,
}

impl ActionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize the shared services. Later calls are no-ops that return
    /// the services built by the first successful call.
    pub fn initialize(&self, ctx: InitContext) -> Result<Arc<EngineServices>, FlowError> {
        if let Some(services) = self.services.get() {
            tracing::debug!("flow action factory already initialized");
            return Ok(services.clone());
        }
        self.services
            .get_or_try_init(|| EngineServices::from_init(ctx).map(Arc::new))
            .cloned()
    }

    pub fn services(&self) -> Option<&Arc<EngineServices>> {
        self.services.get()
    }

    pub async fn new_action(&self, config: ActionConfig) -> Result<FlowAction, FlowError> {
        let services = self
            .services
            .get()
            .cloned()
            .ok_or_else(|| FlowError::Configuration("action factory not initialized".to_string()))?;

        let settings: Settings = serde_json::from_value(config.settings)
            .map_err(|e| FlowError::Configuration(format!("action settings error: {}", e)))?;

        let definition = services
            .resolver
            .get_flow(&settings.flow_uri)
            .await?
            .ok_or_else(|| FlowError::Resolution(settings.flow_uri.clone()))?;
        services.check_definition(&definition)?;

        let res_flow = services
            .resolver
            .is_resource(&settings.flow_uri)
            .then(|| definition.clone());

        Ok(FlowAction {
            id: config.id,
            flow_uri: settings.flow_uri,
            io_metadata: definition.metadata.clone(),
            res_flow,
            services,
        })
    }
}

pub struct FlowAction {
    id: Option<String>,
    flow_uri: String,
    res_flow: Option<Arc<FlowDefinition>>,
    io_metadata: IoMetadata,
    services: Arc<EngineServices>,
}

impl FlowAction {
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn flow_uri(&self) -> &str {
        &self.flow_uri
    }

    pub fn io_metadata(&self) -> &IoMetadata {
        &self.io_metadata
    }

    async fn definition_for(&self, flow_uri: &str) -> Result<Arc<FlowDefinition>, FlowError> {
        if flow_uri == self.flow_uri {
            if let Some(def) = &self.res_flow {
                return Ok(def.clone());
            }
        }
        let definition = self
            .services
            .resolver
            .get_flow(flow_uri)
            .await?
            .ok_or_else(|| FlowError::Resolution(format!("flow not found for URI: {}", flow_uri)))?;
        self.services.check_definition(&definition)?;
        Ok(definition)
    }

    fn next_instance_id(&self, preserved: Option<String>) -> String {
        preserved
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| self.services.id_generator.next_as_string())
    }

    /// Launch a run.
    ///
    /// Validation and setup happen before this returns; an `Err` means no
    /// instance was launched and `handler` is never called. After `Ok` the
    /// outcome arrives only through `handler`.
    pub async fn run(
        &self,
        ctx: RunContext,
        request: RunRequest,
        handler: Arc<dyn ResultHandler>,
    ) -> Result<(), FlowError> {
        let RunRequest { inputs, options } = request;
        let RunOptions {
            op,
            return_id,
            preserved_instance_id,
            initial_state,
            flow_uri,
            exec_options,
            init_step_id,
            rerun,
        } = options;

        let flow_uri = flow_uri
            .filter(|uri| !uri.is_empty())
            .unwrap_or_else(|| self.flow_uri.clone());
        if flow_uri.is_empty() {
            return Err(FlowError::Configuration(
                "cannot run flow, flowURI not specified".to_string(),
            ));
        }

        tracing::debug!("Running FlowAction for URI: '{}'", flow_uri);
        let event_id = ctx.event_id.as_deref();

        let mut inst = match op {
            RunOp::Start => {
                let definition = self.definition_for(&flow_uri).await?;
                let instance_id = self.next_instance_id(preserved_instance_id);
                tracing::debug!(
                    "Creating Flow Instance [{}] for event id [{}]",
                    instance_id,
                    event_id.unwrap_or("")
                );
                let env = self.services.instance_env(&definition)?;
                let span = Instance::logging_span(&definition.name, &instance_id, event_id);
                Instance::new(instance_id, flow_uri.clone(), definition, env, span)
            }
            RunOp::Restart => {
                let state = initial_state.ok_or_else(|| {
                    FlowError::Precondition(
                        "unable to restart instance, initial state not provided".to_string(),
                    )
                })?;
                let definition = self.definition_for(&state.flow_uri).await?;
                let instance_id = self.next_instance_id(preserved_instance_id);
                tracing::debug!("Restarting Flow Instance: {}", instance_id);
                let env = self.services.instance_env(&definition)?;
                let span = Instance::logging_span(&definition.name, &instance_id, event_id);
                // The first increment of the loop lands on init_step_id.
                Instance::from_state(state, definition, env, span.clone()).restart(
                    instance_id,
                    init_step_id.saturating_sub(1),
                    span,
                )?
            }
            RunOp::Resume => {
                let state = initial_state.ok_or_else(|| {
                    FlowError::Precondition(
                        "unable to resume instance, initial state not provided".to_string(),
                    )
                })?;
                let definition = self.definition_for(&state.flow_uri).await?;
                tracing::debug!("Resuming Flow Instance: {}", state.id);
                let env = self.services.instance_env(&definition)?;
                let span = Instance::logging_span(&definition.name, &state.id, event_id);
                Instance::from_state(state, definition, env, span)
            }
        };

        // Only a run that begins at step 0 captures the initial state.
        let begins_at_step_zero = match op {
            RunOp::Start => true,
            RunOp::Restart => init_step_id == 0,
            RunOp::Resume => inst.step_count() == 0,
        };

        inst.set_instance_recorder(self.services.instance_recorder(rerun));
        inst.set_cancellation(ctx.cancellation.clone());
        inst.update_start_time();

        if let Some(tracer) = &self.services.tracer {
            let tc = tracer.start_trace(&inst.span_config(), ctx.trace_parent.as_ref())?;
            inst.set_tracing_context(tc);
        }

        if let Some(recorder) = &self.services.recorder {
            if let Err(e) = recorder
                .record_start(FlowState::capture(&inst, &inputs, rerun))
                .await
            {
                tracing::warn!("Failed to record start of [{}]: {}", inst.id(), e);
            }
        }

        tracing::info!(
            "Executing Flow Instance [{}] for event id [{}]",
            inst.id(),
            event_id.unwrap_or("")
        );

        match op {
            RunOp::Start => inst.start(inputs.clone()),
            RunOp::Restart | RunOp::Resume => inst.update_attrs(inputs.clone()),
        }

        if let Some(exec_options) = &exec_options {
            tracing::debug!("Applying Exec Options to instance: {}", inst.id());
            inst.apply_exec_options(exec_options);
        }

        if begins_at_step_zero {
            if let Some(recorder) = inst.instance_recorder().cloned() {
                recorder.record_initial(&inst).await;
            }
        }

        let span = inst.span().clone();
        let scheduler = StepScheduler {
            instance: inst,
            done: DoneGuard::new(handler),
            recorder: self.services.recorder.clone(),
            tracer: self.services.tracer.clone(),
            inputs,
            return_id,
            rerun,
            max_step_count: self.services.config.max_step_count,
            cancellation: ctx.cancellation,
            event_id: ctx.event_id,
        };
        tokio::spawn(scheduler.run().instrument(span));

        Ok(())
    }
}
