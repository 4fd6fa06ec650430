use crate::{DefinitionError, Value};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub type TaskId = String;

/// Immutable flow definition: a task graph plus its I/O metadata.
///
/// Definitions are shared between every instance of the same flow URI
/// and are never mutated once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Step model used to schedule the graph; the default model when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub metadata: IoMetadata,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub settings: FlowSettings,
}

impl FlowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            model: None,
            metadata: IoMetadata::default(),
            tasks: Vec::new(),
            links: Vec::new(),
            settings: FlowSettings::default(),
        }
    }

    pub fn add_task(&mut self, task: TaskSpec) -> TaskId {
        let id = task.id.clone();
        self.tasks.push(task);
        id
    }

    pub fn link(&mut self, from: impl Into<TaskId>, to: impl Into<TaskId>) {
        self.links.push(Link {
            from: from.into(),
            to: to.into(),
        });
    }

    pub fn with_input(mut self, name: impl Into<String>) -> Self {
        self.metadata.input.push(AttrSpec::new(name));
        self
    }

    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.metadata.output.push(AttrSpec::new(name));
        self
    }

    pub fn find_task(&self, id: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Task ids linked into `id`.
    pub fn predecessors<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.links
            .iter()
            .filter(move |l| l.to == id)
            .map(|l| l.from.as_str())
    }

    /// Task ids linked out of `id`.
    pub fn successors<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.links
            .iter()
            .filter(move |l| l.from == id)
            .map(|l| l.to.as_str())
    }

    /// Checks task ids are unique, links point at known tasks and the
    /// graph is acyclic.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::Invalid("flow name is empty".to_string()));
        }

        let mut graph = DiGraph::<&str, ()>::new();
        let mut index = HashMap::new();
        for task in &self.tasks {
            if index.contains_key(task.id.as_str()) {
                return Err(DefinitionError::DuplicateTask(task.id.clone()));
            }
            index.insert(task.id.as_str(), graph.add_node(task.id.as_str()));
        }

        let mut seen = HashSet::new();
        for link in &self.links {
            let from = index
                .get(link.from.as_str())
                .ok_or_else(|| DefinitionError::TaskNotFound(link.from.clone()))?;
            let to = index
                .get(link.to.as_str())
                .ok_or_else(|| DefinitionError::TaskNotFound(link.to.clone()))?;
            if from == to {
                return Err(DefinitionError::InvalidLink(format!(
                    "task '{}' links to itself",
                    link.from
                )));
            }
            if !seen.insert((from, to)) {
                return Err(DefinitionError::InvalidLink(format!(
                    "duplicate link {} -> {}",
                    link.from, link.to
                )));
            }
            graph.add_edge(*from, *to, ());
        }

        if toposort(&graph, None).is_err() {
            return Err(DefinitionError::CyclicDependency);
        }

        Ok(())
    }
}

/// Declared flow inputs and outputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IoMetadata {
    #[serde(default)]
    pub input: Vec<AttrSpec>,
    #[serde(default)]
    pub output: Vec<AttrSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl AttrSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

/// A task declared in a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    pub activity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Static activity settings.
    #[serde(default)]
    pub settings: HashMap<String, Value>,
    /// Activity input name -> mapping expression.
    #[serde(default)]
    pub input: HashMap<String, String>,
    /// Activity output name -> flow attribute name.
    #[serde(default)]
    pub output: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl TaskSpec {
    pub fn new(id: impl Into<TaskId>, activity: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            activity: activity.into(),
            name: None,
            settings: HashMap::new(),
            input: HashMap::new(),
            output: HashMap::new(),
            retry: None,
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, expr: impl Into<String>) -> Self {
        self.input.insert(name.into(), expr.into());
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, attr: impl Into<String>) -> Self {
        self.output.insert(name.into(), attr.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, delay_ms: u64) -> Self {
        self.retry = Some(RetryPolicy {
            max_attempts,
            delay_ms,
            backoff_multiplier: 1.0,
        });
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Directed link between two tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Link {
    pub from: TaskId,
    pub to: TaskId,
}

/// Retry policy for a single task's activity evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
    #[serde(default = "default_backoff")]
    pub backoff_multiplier: f64,
}

fn default_backoff() -> f64 {
    1.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Flow-wide execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSettings {
    #[serde(default)]
    pub task_timeout_ms: Option<u64>,
    #[serde(default)]
    pub on_error: ErrorHandling,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            task_timeout_ms: None,
            on_error: ErrorHandling::StopFlow,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ErrorHandling {
    /// A failed task fails the instance.
    #[default]
    StopFlow,
    /// A failed task is recorded and its successors still run.
    ContinueOnError,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear() -> FlowDefinition {
        let mut def = FlowDefinition::new("linear");
        def.add_task(TaskSpec::new("a", "log"));
        def.add_task(TaskSpec::new("b", "log"));
        def.link("a", "b");
        def
    }

    #[test]
    fn linear_flow_is_valid() {
        assert!(linear().validate().is_ok());
    }

    #[test]
    fn cycle_is_rejected() {
        let mut def = linear();
        def.link("b", "a");
        assert!(matches!(def.validate(), Err(DefinitionError::CyclicDependency)));
    }

    #[test]
    fn unknown_link_target_is_rejected() {
        let mut def = linear();
        def.link("b", "missing");
        assert!(matches!(def.validate(), Err(DefinitionError::TaskNotFound(id)) if id == "missing"));
    }

    #[test]
    fn duplicate_task_is_rejected() {
        let mut def = linear();
        def.add_task(TaskSpec::new("a", "log"));
        assert!(matches!(def.validate(), Err(DefinitionError::DuplicateTask(_))));
    }

    #[test]
    fn parses_plain_json() {
        let json = r#"{
            "name": "double",
            "metadata": { "input": [{ "name": "x" }], "output": [{ "name": "y" }] },
            "tasks": [
                { "id": "mul", "activity": "math.multiply",
                  "settings": { "factor": 2 },
                  "input": { "value": "$.x" },
                  "output": { "result": "y" } }
            ]
        }"#;
        let def: FlowDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.tasks[0].settings["factor"], Value::Number(2.0));
        assert_eq!(def.metadata.output[0].name, "y");
        assert_eq!(def.settings.on_error, ErrorHandling::StopFlow);
    }
}
