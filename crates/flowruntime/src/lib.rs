//! Flow instance execution runtime
//!
//! This crate drives flow instances: it builds or reconstructs an instance
//! for each run request, steps it to completion on its own task, records
//! its state, traces it and reports the outcome through a result handler.

mod action;
mod config;
mod handler;
mod idgen;
mod instance;
mod mapper;
mod model;
mod recorder;
mod registry;
mod resolver;
mod runtime;
mod scheduler;
mod tracer;

pub use action::{
    ActionConfig, ActionFactory, FlowAction, RunContext, RunOp, RunOptions, RunRequest, Settings,
    RUN_OPTIONS_KEY,
};
pub use config::{
    recording_mode_from_settings, EngineConfig, DEFAULT_MAX_STEP_COUNT, MAX_STEP_COUNT,
    SNAPSHOT_RECORDING_MODE, STATE_RECORDING_MODE, STEP_RECORDING_MODE,
};
pub use handler::{collect_results, ChannelResultHandler, HandlerEvent, ResultHandler, RunOutput};
pub use idgen::IdGenerator;
pub use instance::{
    ExecOptions, FlowStatus, Instance, InstanceEnv, InstanceState, StepChanges, TaskPatch,
};
pub use mapper::{activity_attr, resolve, resolve_inputs};
pub use model::{ModelRegistry, SimpleModel, StepModel, TaskStatus, SIMPLE_MODEL};
pub use recorder::{
    FlowState, InMemoryRecorder, InstanceHistory, InstanceRecorder, RecorderError, RecordingMode,
    StateRecord, StateRecorder,
};
pub use registry::{ActivityFactory, ActivityMetadata, ActivityRegistry, PortDefinition};
pub use resolver::{load_definition, FlowManager, FlowResolver, FILE_PREFIX, RESOURCE_PREFIX};
pub use runtime::{EngineServices, InitContext};
pub use tracer::{SpanConfig, SpanTracer, TraceContext, Tracer};
