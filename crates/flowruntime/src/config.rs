use crate::recorder::RecordingMode;
use flowcore::{FlowError, Value};
use std::collections::HashMap;

pub const STATE_RECORDING_MODE: &str = "stateRecordingMode";
/// Deprecated, superseded by [`STATE_RECORDING_MODE`].
pub const STEP_RECORDING_MODE: &str = "stepRecordingMode";
/// Deprecated, superseded by [`STATE_RECORDING_MODE`].
pub const SNAPSHOT_RECORDING_MODE: &str = "snapshotRecordingMode";
pub const MAX_STEP_COUNT: &str = "maxStepCount";

pub const DEFAULT_MAX_STEP_COUNT: u64 = 1_000_000;

/// Process-wide engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Safety bound on scheduler iterations per run
    pub max_step_count: u64,
    pub recording_mode: RecordingMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_step_count: DEFAULT_MAX_STEP_COUNT,
            recording_mode: RecordingMode::Off,
        }
    }
}

impl EngineConfig {
    /// Build the configuration from runtime settings.
    pub fn from_runtime_settings(settings: &HashMap<String, Value>) -> Result<Self, FlowError> {
        let mut config = Self {
            recording_mode: recording_mode_from_settings(settings)?,
            ..Self::default()
        };

        if let Some(value) = settings.get(MAX_STEP_COUNT) {
            config.max_step_count = value
                .coerce_to_string()
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|n| *n >= 1.0 && n.fract() == 0.0)
                .map(|n| n as u64)
                .ok_or_else(|| {
                    FlowError::Configuration(format!(
                        "{} must be a positive integer, got {:?}",
                        MAX_STEP_COUNT, value
                    ))
                })?;
        }

        Ok(config)
    }
}

/// Resolve the recording mode, honouring the deprecated step/snapshot keys
/// when the primary key is absent.
pub fn recording_mode_from_settings(
    settings: &HashMap<String, Value>,
) -> Result<RecordingMode, FlowError> {
    if let Some(mode) = settings.get(STATE_RECORDING_MODE) {
        let mode = mode.coerce_to_string().ok_or_else(|| {
            FlowError::Configuration(format!("{} must be a string", STATE_RECORDING_MODE))
        })?;
        return mode.parse();
    }

    let is_full = |key: &str| {
        settings
            .get(key)
            .and_then(Value::coerce_to_string)
            .map(|s| s.eq_ignore_ascii_case("full"))
            .unwrap_or(false)
    };

    let mode = match (is_full(STEP_RECORDING_MODE), is_full(SNAPSHOT_RECORDING_MODE)) {
        (true, true) => RecordingMode::Full,
        (true, false) => RecordingMode::Step,
        (false, true) => RecordingMode::Snapshot,
        (false, false) => RecordingMode::Off,
    };
    Ok(mode)
}
