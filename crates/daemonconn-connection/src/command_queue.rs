//! Ordered single-consumer queue with a swappable handler.
//!
//! The receive loop is the only producer. At most one worker thread consumes
//! at a time, bound to the handler attached with
//! [`use_handler`](CommandQueue::use_handler). Commands are delivered oldest
//! first. What a command means, and what happens to pending commands when the
//! connection drops, is decided by a [`QueueStrategy`].

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace, warn};

use crate::error::{panic_message, ConnectionError, HandlerError, Result};
use crate::executor::{Executor, Worker};
use crate::stoppable::Stoppable;

/// Whether the worker keeps consuming after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// The type-specific half of a [`CommandQueue`].
pub trait QueueStrategy: 'static {
    type Command: Send + 'static;
    type Handler: Send + 'static;

    /// Worker thread name; also names the queue in errors and logs.
    const NAME: &'static str;

    /// Logged at `warn` when a handler fails.
    const FAILURE_MESSAGE: &'static str;

    /// Deliver one command.
    fn handle(
        handler: &mut Self::Handler,
        command: Self::Command,
    ) -> std::result::Result<Flow, HandlerError>;

    /// Adjust pending commands when the connection drops. Runs under the queue lock.
    fn on_disconnect(pending: &mut VecDeque<Self::Command>);
}

struct Shared<C> {
    state: Mutex<QueueState<C>>,
    condition: Condvar,
}

struct QueueState<C> {
    pending: VecDeque<C>,
    /// The current handler was detached.
    removed: bool,
    /// The queue was shut down for good.
    stopped: bool,
    disconnected: bool,
    /// Bumped on every attach; a worker only consumes for its own epoch.
    epoch: u64,
    worker: Option<Worker>,
}

impl<C> QueueState<C> {
    fn is_closed_for(&self, epoch: u64) -> bool {
        self.removed || self.stopped || self.epoch != epoch
    }
}

impl<C> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, QueueState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Generic engine shared by the stdin and cancel queues.
pub struct CommandQueue<S: QueueStrategy> {
    shared: Arc<Shared<S::Command>>,
    executor: Executor,
    _strategy: PhantomData<fn() -> S>,
}

impl<S: QueueStrategy> CommandQueue<S> {
    pub fn new(executor: Executor) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    removed: false,
                    stopped: false,
                    disconnected: false,
                    epoch: 0,
                    worker: None,
                }),
                condition: Condvar::new(),
            }),
            executor,
            _strategy: PhantomData,
        }
    }

    /// Enqueue a command. Never blocks on the consumer.
    pub fn add(&self, command: S::Command) {
        let mut state = self.shared.lock();
        if state.stopped {
            trace!(queue = S::NAME, "queue stopped; dropping command");
            return;
        }
        state.pending.push_back(command);
        self.shared.condition.notify_all();
    }

    /// Attach a handler, or detach the current one with `None`.
    ///
    /// Attaching while a handler is attached fails with
    /// [`ConnectionError::HandlerAlreadyAttached`]. Detaching blocks until the
    /// worker has exited and discards every undelivered command.
    pub fn use_handler(&self, handler: Option<S::Handler>) -> Result<()> {
        match handler {
            Some(handler) => self.start_consuming(handler),
            None => self.stop_consuming(),
        }
    }

    /// Mark the connection as dropped. Only the first call has an effect.
    pub fn disconnect(&self) {
        let mut state = self.shared.lock();
        if state.disconnected {
            return;
        }
        state.disconnected = true;
        S::on_disconnect(&mut state.pending);
        self.shared.condition.notify_all();
    }

    /// Number of commands waiting for delivery.
    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }

    fn start_consuming(&self, handler: S::Handler) -> Result<()> {
        let mut state = self.shared.lock();
        if state.stopped {
            return Err(ConnectionError::QueueStopped { queue: S::NAME });
        }
        if state.worker.is_some() {
            return Err(ConnectionError::HandlerAlreadyAttached { queue: S::NAME });
        }

        state.removed = false;
        state.epoch = state.epoch.wrapping_add(1);
        if state.disconnected {
            // Late handlers still observe the disconnect.
            S::on_disconnect(&mut state.pending);
        }

        let epoch = state.epoch;
        let shared = Arc::clone(&self.shared);
        let worker = self
            .executor
            .spawn(S::NAME, move || consume::<S>(&shared, handler, epoch))?;
        state.worker = Some(worker);
        debug!(queue = S::NAME, "handler attached");
        Ok(())
    }

    fn stop_consuming(&self) -> Result<()> {
        let worker = {
            let mut state = self.shared.lock();
            state.pending.clear();
            state.removed = true;
            self.shared.condition.notify_all();
            state.worker.take()
        };
        match worker {
            Some(worker) => {
                debug!(queue = S::NAME, "handler detached");
                worker.stop()
            }
            None => Ok(()),
        }
    }
}

impl<S: QueueStrategy> Stoppable for CommandQueue<S> {
    /// Shut the queue down: undelivered commands are dropped and the call
    /// returns once an in-flight handler invocation has finished.
    fn stop(&self) -> Result<()> {
        let worker = {
            let mut state = self.shared.lock();
            state.stopped = true;
            state.pending.clear();
            self.shared.condition.notify_all();
            state.worker.take()
        };
        match worker {
            Some(worker) => worker.stop(),
            None => Ok(()),
        }
    }
}

fn consume<S: QueueStrategy>(shared: &Shared<S::Command>, mut handler: S::Handler, epoch: u64) {
    loop {
        let command = {
            let mut state = shared.lock();
            loop {
                if state.is_closed_for(epoch) {
                    trace!(queue = S::NAME, "queue closed; worker exiting");
                    return;
                }
                if let Some(command) = state.pending.pop_front() {
                    break command;
                }
                state = shared
                    .condition
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        if dispatch::<S>(&mut handler, command) == Flow::Stop {
            trace!(queue = S::NAME, "handler finished; worker exiting");
            return;
        }
    }
}

/// Run one handler step. Failures and panics are logged and end consumption.
fn dispatch<S: QueueStrategy>(handler: &mut S::Handler, command: S::Command) -> Flow {
    match panic::catch_unwind(AssertUnwindSafe(|| S::handle(handler, command))) {
        Ok(Ok(flow)) => flow,
        Ok(Err(err)) => {
            warn!(queue = S::NAME, error = %err, "{}", S::FAILURE_MESSAGE);
            Flow::Stop
        }
        Err(payload) => {
            warn!(
                queue = S::NAME,
                panic = %panic_message(payload.as_ref()),
                "{}",
                S::FAILURE_MESSAGE
            );
            Flow::Stop
        }
    }
}
