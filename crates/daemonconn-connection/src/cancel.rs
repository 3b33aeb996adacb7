use std::collections::VecDeque;

use daemonconn_protocol::CancelSignal;

use crate::command_queue::{CommandQueue, Flow, QueueStrategy};
use crate::error::{HandlerError, HandlerResult};

/// Invoked when the client asks to cancel the running build.
///
/// A handler sees at most one signal per attachment.
pub type CancelHandler = Box<dyn FnMut(CancelSignal) -> HandlerResult + Send>;

/// Strategy for the cancel queue.
pub struct Cancel;

impl QueueStrategy for Cancel {
    type Command = CancelSignal;
    type Handler = CancelHandler;

    const NAME: &'static str = "Cancel handler";
    const FAILURE_MESSAGE: &'static str = "could not process cancel request from client";

    fn handle(handler: &mut Self::Handler, command: CancelSignal) -> Result<Flow, HandlerError> {
        handler(command)?;
        Ok(Flow::Stop)
    }

    /// Signals that arrived before the drop stay deliverable.
    fn on_disconnect(_pending: &mut VecDeque<CancelSignal>) {}
}

/// Delivers cancel signals to a [`CancelHandler`].
pub type CancelQueue = CommandQueue<Cancel>;
