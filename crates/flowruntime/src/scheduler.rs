use crate::handler::DoneGuard;
use crate::instance::{FlowStatus, Instance};
use crate::recorder::{FlowState, StateRecorder};
use crate::tracer::Tracer;
use chrono::Utc;
use flowcore::{ExecutionError, FlowError, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Drives one instance from its current step to a terminal status.
///
/// Owns the instance and the handler for the duration of the run; steps are
/// strictly sequential.
pub(crate) struct StepScheduler {
    pub(crate) instance: Instance,
    pub(crate) done: DoneGuard,
    pub(crate) recorder: Option<Arc<dyn StateRecorder>>,
    pub(crate) tracer: Option<Arc<dyn Tracer>>,
    pub(crate) inputs: HashMap<String, Value>,
    pub(crate) return_id: bool,
    pub(crate) rerun: bool,
    pub(crate) max_step_count: u64,
    pub(crate) cancellation: CancellationToken,
    pub(crate) event_id: Option<String>,
}

impl StepScheduler {
    pub(crate) async fn run(mut self) {
        let inst = &mut self.instance;
        let handler = self.done.handler();
        let event_id = self.event_id.as_deref().unwrap_or("");

        if self.return_id {
            let mut ack = HashMap::new();
            ack.insert("id".to_string(), Value::from(inst.id()));
            handler.handle_result(Ok(ack));
        }

        let mut has_work = true;
        while has_work && inst.status() < FlowStatus::Completed && inst.step_count() < self.max_step_count {
            if self.cancellation.is_cancelled() {
                break;
            }
            let step = inst.advance_step();
            tracing::debug!("Step: {}", step);
            let task_start_time = Utc::now();
            has_work = inst.do_step().await;
            if let Some(recorder) = inst.instance_recorder().cloned() {
                recorder.record_state(inst, task_start_time).await;
            }
        }

        if inst.status() == FlowStatus::Active {
            let step = inst.step_count();
            let error = if self.cancellation.is_cancelled() {
                ExecutionError::Cancelled { step }
            } else if step >= self.max_step_count {
                ExecutionError::StepLimitExceeded {
                    limit: self.max_step_count,
                }
            } else {
                ExecutionError::Stalled { step }
            };
            tracing::warn!("Flow instance [{}] stopped before finishing: {}", inst.id(), error);
            inst.fail(error);
        }

        match inst.status() {
            FlowStatus::Completed => {
                let result = inst.return_data();
                if let (Some(tracer), Some(tc)) = (&self.tracer, inst.take_tracing_context()) {
                    if let Err(e) = tracer.finish_trace(tc, None) {
                        tracing::warn!("Failed to finish trace: {}", e);
                    }
                }
                handler.handle_result(result);
            }
            FlowStatus::Failed => {
                let error = inst
                    .error()
                    .cloned()
                    .unwrap_or(ExecutionError::Stalled { step: inst.step_count() });
                if let (Some(tracer), Some(tc)) = (&self.tracer, inst.take_tracing_context()) {
                    if let Err(e) = tracer.finish_trace(tc, Some(&error)) {
                        tracing::warn!("Failed to finish trace: {}", e);
                    }
                }
                handler.handle_result(Err(FlowError::Execution(error)));
            }
            FlowStatus::Active => {}
        }

        tracing::debug!(
            "Executing flow instance [{}] for event id [{}] - Status: {:?}",
            inst.id(),
            event_id,
            inst.status()
        );

        match inst.status() {
            FlowStatus::Completed => tracing::info!(
                "Flow Instance [{}] for event id [{}] completed in {:?}",
                inst.id(),
                event_id,
                inst.execution_time()
            ),
            FlowStatus::Failed => tracing::info!(
                "Flow Instance [{}] for event id [{}] failed in {:?}",
                inst.id(),
                event_id,
                inst.execution_time()
            ),
            FlowStatus::Active => {}
        }

        if let Some(recorder) = &self.recorder {
            let state = FlowState::capture(inst, inst.attrs(), self.rerun);
            if let Err(e) = recorder.record_done(state).await {
                tracing::warn!("Failed to record completion of [{}]: {}", inst.id(), e);
            }
        }
    }
}
