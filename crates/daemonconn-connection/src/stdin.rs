use std::collections::VecDeque;

use daemonconn_protocol::{EndOfInput, InputChunk, IoCommand};

use crate::command_queue::{CommandQueue, Flow, QueueStrategy};
use crate::error::{HandlerError, HandlerResult};

/// Receives the client's forwarded standard input.
///
/// Calls arrive on a dedicated worker thread, in the order the client sent
/// them. After [`on_end_of_input`](StdinHandler::on_end_of_input) no further
/// calls are made. Returning an error also ends delivery.
pub trait StdinHandler: Send {
    fn on_input(&mut self, input: InputChunk) -> HandlerResult;

    /// Input is finished, either because the client closed it or because the
    /// connection dropped (see [`EndOfInput::is_disconnect`]).
    fn on_end_of_input(&mut self, end: EndOfInput) -> HandlerResult;
}

/// Strategy for the stdin queue.
pub struct Stdin;

impl QueueStrategy for Stdin {
    type Command = IoCommand;
    type Handler = Box<dyn StdinHandler>;

    const NAME: &'static str = "Stdin handler";
    const FAILURE_MESSAGE: &'static str = "could not forward client stdin";

    fn handle(handler: &mut Self::Handler, command: IoCommand) -> Result<Flow, HandlerError> {
        match command {
            IoCommand::Input(input) => {
                handler.on_input(input)?;
                Ok(Flow::Continue)
            }
            IoCommand::EndOfInput(end) => {
                handler.on_end_of_input(end)?;
                Ok(Flow::Stop)
            }
        }
    }

    /// Input already received is still delivered; the handler then hears that
    /// input ended, once.
    fn on_disconnect(pending: &mut VecDeque<IoCommand>) {
        let ended = pending
            .iter()
            .any(|command| matches!(command, IoCommand::EndOfInput(_)));
        if !ended {
            pending.push_back(IoCommand::EndOfInput(EndOfInput::disconnected()));
        }
    }
}

/// Delivers forwarded stdin to a [`StdinHandler`].
pub type StdinQueue = CommandQueue<Stdin>;
