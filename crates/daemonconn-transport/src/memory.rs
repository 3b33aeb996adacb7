use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use daemonconn_protocol::Message;
use tracing::trace;

use crate::channel::RawChannel;
use crate::error::{Result, TransportError};

/// One direction of a [`MemoryChannel`] pair.
#[derive(Default)]
struct Pipe {
    state: Mutex<PipeState>,
    ready: Condvar,
}

#[derive(Default)]
struct PipeState {
    messages: VecDeque<Message>,
    closed: bool,
}

impl Pipe {
    fn lock(&self) -> MutexGuard<'_, PipeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process duplex channel.
///
/// Closing either end closes both directions: the closing end stops seeing
/// messages immediately, the other end drains what was already sent and then
/// observes end of stream.
pub struct MemoryChannel {
    inbound: Arc<Pipe>,
    outbound: Arc<Pipe>,
}

impl MemoryChannel {
    /// Create two connected endpoints.
    pub fn pair() -> (Self, Self) {
        let left_to_right = Arc::new(Pipe::default());
        let right_to_left = Arc::new(Pipe::default());
        (
            Self {
                inbound: Arc::clone(&right_to_left),
                outbound: Arc::clone(&left_to_right),
            },
            Self {
                inbound: left_to_right,
                outbound: right_to_left,
            },
        )
    }
}

impl RawChannel for MemoryChannel {
    fn receive(&self) -> Result<Option<Message>> {
        let mut state = self.inbound.lock();
        loop {
            if let Some(message) = state.messages.pop_front() {
                return Ok(Some(message));
            }
            if state.closed {
                return Ok(None);
            }
            state = self
                .inbound
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn dispatch(&self, message: Message) -> Result<()> {
        let mut state = self.outbound.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        trace!(message = message.variant_name(), "memory channel dispatch");
        state.messages.push_back(message);
        self.outbound.ready.notify_all();
        Ok(())
    }

    fn close(&self) -> Result<()> {
        {
            let mut state = self.inbound.lock();
            state.closed = true;
            state.messages.clear();
            self.inbound.ready.notify_all();
        }
        let mut state = self.outbound.lock();
        state.closed = true;
        self.outbound.ready.notify_all();
        Ok(())
    }
}

impl std::fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChannel").finish_non_exhaustive()
    }
}
