use flowcore::{FlowError, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type RunOutput = HashMap<String, Value>;

/// Receives the outcome of a launched run.
///
/// `handle_result` is called once for the final outcome, plus once before
/// that with `{"id": ..}` when the caller asked for the instance id.
/// `done` is called exactly once after the last result.
pub trait ResultHandler: Send + Sync {
    fn handle_result(&self, result: Result<RunOutput, FlowError>);

    fn done(&self);
}

/// Calls `done` on the wrapped handler when dropped, including on unwind.
pub(crate) struct DoneGuard {
    handler: Arc<dyn ResultHandler>,
}

impl DoneGuard {
    pub(crate) fn new(handler: Arc<dyn ResultHandler>) -> Self {
        Self { handler }
    }

    pub(crate) fn handler(&self) -> &dyn ResultHandler {
        self.handler.as_ref()
    }
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.handler.done();
    }
}

#[derive(Debug)]
pub enum HandlerEvent {
    Result(Result<RunOutput, FlowError>),
    Done,
}

/// Forwards every handler call onto an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelResultHandler {
    sender: mpsc::UnboundedSender<HandlerEvent>,
}

impl ChannelResultHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HandlerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ResultHandler for ChannelResultHandler {
    fn handle_result(&self, result: Result<RunOutput, FlowError>) {
        let _ = self.sender.send(HandlerEvent::Result(result));
    }

    fn done(&self) {
        let _ = self.sender.send(HandlerEvent::Done);
    }
}

/// Drain a channel handler until `Done`, returning every result seen.
pub async fn collect_results(
    receiver: &mut mpsc::UnboundedReceiver<HandlerEvent>,
) -> Vec<Result<RunOutput, FlowError>> {
    let mut results = Vec::new();
    while let Some(event) = receiver.recv().await {
        match event {
            HandlerEvent::Result(result) => results.push(result),
            HandlerEvent::Done => break,
        }
    }
    results
}
