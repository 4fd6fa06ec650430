//! Trace span lifecycle for flow runs.

use flowcore::{ExecutionError, FlowError};
use std::collections::HashMap;
use tracing::field::Empty;
use uuid::Uuid;

/// What a tracer needs to open a span for an instance.
#[derive(Debug, Clone)]
pub struct SpanConfig {
    pub name: String,
    pub operation: String,
    pub tags: HashMap<String, String>,
}

/// Opaque handle for an open trace span.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    span: tracing::Span,
}

impl TraceContext {
    pub fn new(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        parent_span_id: Option<String>,
        span: tracing::Span,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_span_id,
            span,
        }
    }

    /// Context for an inbound call that carries only trace identifiers.
    pub fn remote(trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        Self::new(trace_id, span_id, None, tracing::Span::none())
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

pub trait Tracer: Send + Sync {
    /// Open a span, continuing `parent`'s trace when given.
    fn start_trace(
        &self,
        config: &SpanConfig,
        parent: Option<&TraceContext>,
    ) -> Result<TraceContext, FlowError>;

    /// Close a span opened by `start_trace`.
    fn finish_trace(
        &self,
        context: TraceContext,
        error: Option<&ExecutionError>,
    ) -> Result<(), FlowError>;
}

/// Tracer backed by `tracing` spans; the span closes when the context is
/// finished and dropped.
#[derive(Debug, Default)]
pub struct SpanTracer;

impl Tracer for SpanTracer {
    fn start_trace(
        &self,
        config: &SpanConfig,
        parent: Option<&TraceContext>,
    ) -> Result<TraceContext, FlowError> {
        let trace_id = parent
            .map(|p| p.trace_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let span_id = Uuid::new_v4().simple().to_string();

        let span = tracing::info_span!(
            parent: parent.and_then(|p| p.span().id()),
            "flow_trace",
            otel.name = %config.name,
            operation = %config.operation,
            trace_id = %trace_id,
            span_id = %span_id,
            tags = ?config.tags,
            otel.status_code = Empty,
            error = Empty,
        );

        Ok(TraceContext::new(
            trace_id,
            span_id,
            parent.map(|p| p.span_id.clone()),
            span,
        ))
    }

    fn finish_trace(
        &self,
        context: TraceContext,
        error: Option<&ExecutionError>,
    ) -> Result<(), FlowError> {
        match error {
            Some(err) => {
                context.span.record("otel.status_code", "ERROR");
                context.span.record("error", tracing::field::display(err));
                tracing::debug!(parent: &context.span, trace_id = %context.trace_id, "trace finished with error");
            }
            None => {
                context.span.record("otel.status_code", "OK");
                tracing::debug!(parent: &context.span, trace_id = %context.trace_id, "trace finished");
            }
        }
        Ok(())
    }
}
