use flowcore::{Activity, ActivityError, TaskSpec, Value};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds activities of one type from a task's static settings.
pub trait ActivityFactory: Send + Sync {
    fn create(&self, settings: &HashMap<String, Value>) -> Result<Box<dyn Activity>, ActivityError>;

    fn activity_type(&self) -> &str;

    fn metadata(&self) -> ActivityMetadata {
        ActivityMetadata::default()
    }
}

/// Description and declared ports of an activity type.
#[derive(Debug, Clone)]
pub struct ActivityMetadata {
    pub description: String,
    pub category: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
}

impl Default for ActivityMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

impl ActivityMetadata {
    fn required_inputs(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .iter()
            .filter(|port| port.required)
            .map(|port| port.name.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct PortDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl PortDefinition {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, description)
        }
    }
}

struct Registered {
    factory: Arc<dyn ActivityFactory>,
    metadata: ActivityMetadata,
}

/// Activity types known to the engine, keyed by type name.
#[derive(Default)]
pub struct ActivityRegistry {
    entries: BTreeMap<String, Registered>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. A later registration of the same type replaces it.
    pub fn register(&mut self, factory: Arc<dyn ActivityFactory>) {
        let activity_type = factory.activity_type().to_string();
        let metadata = factory.metadata();
        if self.entries.contains_key(&activity_type) {
            tracing::warn!("Replacing activity type: {}", activity_type);
        } else {
            tracing::debug!("Registering activity type: {}", activity_type);
        }
        self.entries
            .insert(activity_type, Registered { factory, metadata });
    }

    pub fn create(
        &self,
        activity_type: &str,
        settings: &HashMap<String, Value>,
    ) -> Result<Box<dyn Activity>, ActivityError> {
        match self.entries.get(activity_type) {
            Some(entry) => entry.factory.create(settings),
            None => Err(ActivityError::UnknownActivity(activity_type.to_string())),
        }
    }

    pub fn contains(&self, activity_type: &str) -> bool {
        self.entries.contains_key(activity_type)
    }

    /// Registered type names in sorted order.
    pub fn list_activity_types(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn get_metadata(&self, activity_type: &str) -> Option<ActivityMetadata> {
        self.entries.get(activity_type).map(|e| e.metadata.clone())
    }

    /// Required inputs of the task's activity that neither an input mapping
    /// nor a setting provides. Empty for unknown activity types.
    pub fn unmapped_inputs<'a>(&'a self, task: &TaskSpec) -> Vec<&'a str> {
        let Some(entry) = self.entries.get(&task.activity) else {
            return Vec::new();
        };
        entry
            .metadata
            .required_inputs()
            .filter(|name| !task.input.contains_key(*name) && !task.settings.contains_key(*name))
            .collect()
    }
}
