//! Pluggable step models.
//!
//! A step model decides which tasks of a definition are scheduled when an
//! instance starts and which become ready as tasks finish. The instance
//! owns the work queue; the model only answers questions about the graph.

use flowcore::{FlowDefinition, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Lifecycle of a single task inside an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    NotStarted,
    Ready,
    Done,
    Skipped,
    Failed,
}

impl TaskStatus {
    /// Whether the task has finished, successfully or not.
    pub fn is_settled(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Skipped | TaskStatus::Failed)
    }
}

pub trait StepModel: Send + Sync {
    fn name(&self) -> &str;

    /// Tasks scheduled when an instance starts.
    fn entry_tasks(&self, definition: &FlowDefinition) -> Vec<TaskId>;

    /// Tasks that become ready now that `finished` has settled.
    fn ready_after(
        &self,
        definition: &FlowDefinition,
        finished: &str,
        tasks: &HashMap<TaskId, TaskStatus>,
    ) -> Vec<TaskId>;
}

/// Default model: a task runs once every predecessor has settled.
#[derive(Debug, Default)]
pub struct SimpleModel;

pub const SIMPLE_MODEL: &str = "simple";

impl StepModel for SimpleModel {
    fn name(&self) -> &str {
        SIMPLE_MODEL
    }

    fn entry_tasks(&self, definition: &FlowDefinition) -> Vec<TaskId> {
        definition
            .tasks
            .iter()
            .filter(|t| definition.predecessors(&t.id).next().is_none())
            .map(|t| t.id.clone())
            .collect()
    }

    fn ready_after(
        &self,
        definition: &FlowDefinition,
        finished: &str,
        tasks: &HashMap<TaskId, TaskStatus>,
    ) -> Vec<TaskId> {
        let mut ready = Vec::new();
        for succ in definition.successors(finished) {
            let pending = matches!(
                tasks.get(succ).copied().unwrap_or(TaskStatus::NotStarted),
                TaskStatus::NotStarted
            );
            let unblocked = definition.predecessors(succ).all(|pred| {
                tasks
                    .get(pred)
                    .map(|status| status.is_settled())
                    .unwrap_or(false)
            });
            if pending && unblocked && !ready.iter().any(|r: &TaskId| r == succ) {
                ready.push(succ.to_string());
            }
        }
        ready
    }
}

/// Registry of step models, with a default used when a definition names none.
pub struct ModelRegistry {
    models: HashMap<String, Arc<dyn StepModel>>,
    default: Arc<dyn StepModel>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        let default: Arc<dyn StepModel> = Arc::new(SimpleModel);
        let mut models = HashMap::new();
        models.insert(default.name().to_string(), default.clone());
        Self { models, default }
    }

    pub fn register(&mut self, model: Arc<dyn StepModel>) {
        tracing::info!("Registering step model: {}", model.name());
        self.models.insert(model.name().to_string(), model);
    }

    /// Replace the default model; it is also registered under its own name.
    pub fn register_default(&mut self, model: Arc<dyn StepModel>) {
        self.register(model.clone());
        self.default = model;
    }

    /// Model for a definition, or `None` if it names an unknown model.
    pub fn model_for(&self, definition: &FlowDefinition) -> Option<Arc<dyn StepModel>> {
        match &definition.model {
            Some(name) => self.models.get(name).cloned(),
            None => Some(self.default.clone()),
        }
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
