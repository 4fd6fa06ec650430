use crate::config::EngineConfig;
use crate::idgen::IdGenerator;
use crate::instance::InstanceEnv;
use crate::model::ModelRegistry;
use crate::recorder::{InstanceRecorder, RecordingMode, StateRecorder};
use crate::registry::ActivityRegistry;
use crate::resolver::{FlowManager, FlowResolver};
use crate::tracer::Tracer;
use flowcore::{FlowDefinition, FlowError, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Collaborators handed to the action factory on initialization.
pub struct InitContext {
    pub runtime_settings: HashMap<String, Value>,
    pub resolver: Arc<dyn FlowResolver>,
    pub recorder: Option<Arc<dyn StateRecorder>>,
    pub tracer: Option<Arc<dyn Tracer>>,
    pub activities: ActivityRegistry,
    pub models: ModelRegistry,
}

impl InitContext {
    pub fn new(activities: ActivityRegistry) -> Self {
        Self {
            runtime_settings: HashMap::new(),
            resolver: Arc::new(FlowManager::new()),
            recorder: None,
            tracer: None,
            activities,
            models: ModelRegistry::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.runtime_settings.insert(key.into(), value.into());
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn FlowResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn StateRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn with_models(mut self, models: ModelRegistry) -> Self {
        self.models = models;
        self
    }
}

/// Process-wide services shared read-only by every run.
pub struct EngineServices {
    pub config: EngineConfig,
    pub id_generator: IdGenerator,
    pub resolver: Arc<dyn FlowResolver>,
    pub recorder: Option<Arc<dyn StateRecorder>>,
    pub tracer: Option<Arc<dyn Tracer>>,
    pub activities: Arc<ActivityRegistry>,
    pub models: Arc<ModelRegistry>,
}

impl EngineServices {
    pub fn from_init(ctx: InitContext) -> Result<Self, FlowError> {
        let config = EngineConfig::from_runtime_settings(&ctx.runtime_settings)?;
        tracing::info!(
            recording_mode = %config.recording_mode,
            recorder = ctx.recorder.is_some(),
            tracing = ctx.tracer.is_some(),
            max_step_count = config.max_step_count,
            "flow engine initialized"
        );

        Ok(Self {
            config,
            id_generator: IdGenerator::new(),
            resolver: ctx.resolver,
            recorder: ctx.recorder,
            tracer: ctx.tracer,
            activities: Arc::new(ctx.activities),
            models: Arc::new(ctx.models),
        })
    }

    pub fn recording_mode(&self) -> RecordingMode {
        self.config.recording_mode
    }

    /// Per-run recorder binding, present only when a recorder is configured.
    pub fn instance_recorder(&self, rerun: bool) -> Option<InstanceRecorder> {
        self.recorder
            .as_ref()
            .map(|r| InstanceRecorder::new(r.clone(), self.config.recording_mode, rerun))
    }

    pub fn instance_env(&self, definition: &FlowDefinition) -> Result<InstanceEnv, FlowError> {
        let model = self.models.model_for(definition).ok_or_else(|| {
            FlowError::Configuration(format!(
                "flow '{}' uses unknown step model '{}'",
                definition.name,
                definition.model.as_deref().unwrap_or_default()
            ))
        })?;
        Ok(InstanceEnv {
            activities: self.activities.clone(),
            model,
        })
    }

    /// Check every task of a definition refers to a registered activity.
    pub fn check_definition(&self, definition: &FlowDefinition) -> Result<(), FlowError> {
        self.instance_env(definition)?;
        for task in &definition.tasks {
            if !self.activities.contains(&task.activity) {
                return Err(FlowError::Configuration(format!(
                    "task '{}' of flow '{}' uses unknown activity '{}'",
                    task.id, definition.name, task.activity
                )));
            }
        }
        Ok(())
    }
}
