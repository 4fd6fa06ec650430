//! State recording for audit and replay.
//!
//! The engine calls the recorder at run start, after every step and at run
//! end whenever a recorder is configured. What gets persisted is decided here
//! by the [`RecordingMode`], never at the call sites.

use crate::instance::{FlowStatus, Instance, InstanceState, StepChanges};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use flowcore::{FlowError, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Fidelity at which run history is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingMode {
    #[default]
    Off,
    /// Per-step deltas only.
    Step,
    /// Full state captures only.
    Snapshot,
    /// Deltas and captures.
    Full,
}

impl RecordingMode {
    pub fn records_steps(self) -> bool {
        matches!(self, RecordingMode::Step | RecordingMode::Full)
    }

    pub fn records_snapshots(self) -> bool {
        matches!(self, RecordingMode::Snapshot | RecordingMode::Full)
    }
}

impl FromStr for RecordingMode {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "" => Ok(RecordingMode::Off),
            "step" => Ok(RecordingMode::Step),
            "snapshot" => Ok(RecordingMode::Snapshot),
            "full" => Ok(RecordingMode::Full),
            other => Err(FlowError::Configuration(format!(
                "unknown state recording mode: '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for RecordingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordingMode::Off => "off",
            RecordingMode::Step => "step",
            RecordingMode::Snapshot => "snapshot",
            RecordingMode::Full => "full",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Recorder unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Run-level state passed at start and at completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowState {
    pub instance_id: String,
    pub flow_uri: String,
    pub flow_name: String,
    pub status: FlowStatus,
    pub step: u64,
    pub attrs: HashMap<String, Value>,
    pub rerun: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FlowState {
    pub fn capture(inst: &Instance, attrs: &HashMap<String, Value>, rerun: bool) -> Self {
        Self {
            instance_id: inst.id().to_string(),
            flow_uri: inst.flow_uri().to_string(),
            flow_name: inst.name().to_string(),
            status: inst.status(),
            step: inst.step_count(),
            attrs: attrs.clone(),
            rerun,
            error: inst.error().map(|e| e.to_string()),
            timestamp: Utc::now(),
        }
    }
}

/// One step's worth of recorded history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRecord {
    pub instance_id: String,
    pub flow_uri: String,
    pub step: u64,
    pub status: FlowStatus,
    pub rerun: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<StepChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<InstanceState>,
}

/// Recording service shared by every run in the process.
///
/// Implementations must tolerate concurrent calls from many runs.
#[async_trait]
pub trait StateRecorder: Send + Sync {
    async fn record_start(&self, state: FlowState) -> Result<(), RecorderError>;

    /// Step-0 capture, taken only when a run begins at step 0.
    async fn record_initial(&self, record: StateRecord) -> Result<(), RecorderError>;

    async fn record_state(&self, record: StateRecord) -> Result<(), RecorderError>;

    async fn record_done(&self, state: FlowState) -> Result<(), RecorderError>;
}

/// Binding of the shared recorder to one instance, with the mode and
/// rerun flag of its run.
#[derive(Clone)]
pub struct InstanceRecorder {
    recorder: Arc<dyn StateRecorder>,
    mode: RecordingMode,
    rerun: bool,
}

impl InstanceRecorder {
    pub fn new(recorder: Arc<dyn StateRecorder>, mode: RecordingMode, rerun: bool) -> Self {
        Self {
            recorder,
            mode,
            rerun,
        }
    }

    pub fn mode(&self) -> RecordingMode {
        self.mode
    }

    pub fn rerun(&self) -> bool {
        self.rerun
    }

    fn build(&self, inst: &Instance, start_time: DateTime<Utc>) -> Option<StateRecord> {
        if self.mode == RecordingMode::Off {
            return None;
        }
        Some(StateRecord {
            instance_id: inst.id().to_string(),
            flow_uri: inst.flow_uri().to_string(),
            step: inst.step_count(),
            status: inst.status(),
            rerun: self.rerun,
            start_time,
            end_time: Utc::now(),
            changes: self.mode.records_steps().then(|| inst.changes().clone()),
            snapshot: self.mode.records_snapshots().then(|| inst.to_state()),
        })
    }

    pub async fn record_initial(&self, inst: &Instance) {
        if let Some(record) = self.build(inst, Utc::now()) {
            if let Err(e) = self.recorder.record_initial(record).await {
                tracing::warn!(instance = %inst.id(), "failed to record initial state: {}", e);
            }
        }
    }

    pub async fn record_state(&self, inst: &Instance, step_start: DateTime<Utc>) {
        if let Some(record) = self.build(inst, step_start) {
            if let Err(e) = self.recorder.record_state(record).await {
                tracing::warn!(instance = %inst.id(), step = inst.step_count(), "failed to record step: {}", e);
            }
        }
    }
}

/// Everything recorded for one instance id.
#[derive(Debug, Clone, Default)]
pub struct InstanceHistory {
    pub starts: Vec<FlowState>,
    pub initial: Vec<StateRecord>,
    pub steps: Vec<StateRecord>,
    pub done: Vec<FlowState>,
}

impl InstanceHistory {
    /// Latest snapshot taken at or before `step`.
    pub fn snapshot_at(&self, step: u64) -> Option<&InstanceState> {
        self.initial
            .iter()
            .chain(self.steps.iter())
            .filter(|r| r.step <= step)
            .filter_map(|r| r.snapshot.as_ref())
            .last()
    }
}

/// In-process recorder keeping history per instance id.
#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    histories: DashMap<String, InstanceHistory>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self, instance_id: &str) -> Option<InstanceHistory> {
        self.histories.get(instance_id).map(|h| h.clone())
    }

    pub fn instance_ids(&self) -> Vec<String> {
        self.histories.iter().map(|e| e.key().clone()).collect()
    }
}

#[async_trait]
impl StateRecorder for InMemoryRecorder {
    async fn record_start(&self, state: FlowState) -> Result<(), RecorderError> {
        self.histories
            .entry(state.instance_id.clone())
            .or_default()
            .starts
            .push(state);
        Ok(())
    }

    async fn record_initial(&self, record: StateRecord) -> Result<(), RecorderError> {
        let mut history = self.histories.entry(record.instance_id.clone()).or_default();
        if record.rerun {
            history.initial.clear();
            history.steps.clear();
        }
        history.initial.push(record);
        Ok(())
    }

    async fn record_state(&self, record: StateRecord) -> Result<(), RecorderError> {
        let mut history = self.histories.entry(record.instance_id.clone()).or_default();
        if record.rerun {
            // A rerun replaces history from this step onwards.
            history.steps.retain(|r| r.step < record.step);
        }
        history.steps.push(record);
        Ok(())
    }

    async fn record_done(&self, state: FlowState) -> Result<(), RecorderError> {
        self.histories
            .entry(state.instance_id.clone())
            .or_default()
            .done
            .push(state);
        Ok(())
    }
}
