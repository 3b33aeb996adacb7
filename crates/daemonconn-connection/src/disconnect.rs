//! One-shot notification that the client went away.
//!
//! Unlike the command queues there is no worker thread: the handler runs on
//! whichever thread observes the disconnect second-hand, either the receive
//! loop calling [`DisconnectNotifier::disconnect`] or the application calling
//! [`DisconnectNotifier::use_handler`] after the fact.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tracing::{debug, warn};

use crate::error::{panic_message, ConnectionError, HandlerResult, Result};
use crate::stoppable::Stoppable;

const NAME: &str = "Disconnect handler";

/// Invoked once when the connection drops.
pub type DisconnectHandler = Box<dyn FnOnce() -> HandlerResult + Send>;

enum Slot {
    Empty,
    Armed(DisconnectHandler),
    /// The handler has been taken for its single invocation.
    Fired,
}

struct NotifierState {
    handler: Slot,
    disconnected: bool,
    /// Thread currently running the handler, if any.
    notifying: Option<ThreadId>,
}

/// Notifies a single handler, exactly once, that the connection dropped.
pub struct DisconnectNotifier {
    state: Mutex<NotifierState>,
    condition: Condvar,
}

impl Default for DisconnectNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl DisconnectNotifier {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NotifierState {
                handler: Slot::Empty,
                disconnected: false,
                notifying: None,
            }),
            condition: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NotifierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the disconnect and run the attached handler, if any, on this thread.
    ///
    /// Only the first call has an effect.
    pub fn disconnect(&self) {
        let action = {
            let mut state = self.lock();
            if state.disconnected {
                return;
            }
            state.disconnected = true;
            match std::mem::replace(&mut state.handler, Slot::Fired) {
                Slot::Armed(action) => {
                    state.notifying = Some(thread::current().id());
                    action
                }
                other => {
                    state.handler = other;
                    return;
                }
            }
        };
        self.run(action);
    }

    /// Attach a handler, or detach the current one with `None`.
    ///
    /// A handler attached after the disconnect runs immediately, before this
    /// call returns. Detaching waits for an in-flight invocation to finish.
    pub fn use_handler(&self, handler: Option<DisconnectHandler>) -> Result<()> {
        match handler {
            Some(handler) => self.start_monitoring(handler),
            None => {
                self.stop_monitoring();
                Ok(())
            }
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.lock().disconnected
    }

    fn start_monitoring(&self, handler: DisconnectHandler) -> Result<()> {
        let action = {
            let mut state = self.lock();
            if !matches!(state.handler, Slot::Empty) {
                return Err(ConnectionError::HandlerAlreadyAttached { queue: NAME });
            }
            if !state.disconnected {
                state.handler = Slot::Armed(handler);
                return Ok(());
            }
            debug!("client already disconnected; notifying new handler");
            state.handler = Slot::Fired;
            state.notifying = Some(thread::current().id());
            handler
        };
        self.run(action);
        Ok(())
    }

    fn stop_monitoring(&self) {
        let mut state = self.lock();
        let current = thread::current().id();
        while state.notifying.is_some_and(|thread| thread != current) {
            state = self
                .condition
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.handler = Slot::Empty;
    }

    fn run(&self, action: DisconnectHandler) {
        match panic::catch_unwind(AssertUnwindSafe(action)) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "failed to notify disconnect handler"),
            Err(payload) => warn!(
                panic = %panic_message(payload.as_ref()),
                "failed to notify disconnect handler"
            ),
        }

        let mut state = self.lock();
        state.notifying = None;
        self.condition.notify_all();
    }
}

impl Stoppable for DisconnectNotifier {
    /// Detach the handler, waiting for an in-flight invocation.
    fn stop(&self) -> Result<()> {
        self.stop_monitoring();
        Ok(())
    }
}
