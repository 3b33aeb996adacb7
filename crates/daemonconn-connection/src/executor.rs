use std::thread::{self, JoinHandle};

use tracing::{debug, trace};

use crate::error::{ConnectionError, Result};

/// Creates named background workers, one OS thread each.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    stack_size: Option<usize>,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the stack size of spawned worker threads.
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Start `work` on a new thread called `name`.
    pub fn spawn<F>(&self, name: impl Into<String>, work: F) -> Result<Worker>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let mut builder = thread::Builder::new().name(name.clone());
        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }
        let handle = builder
            .spawn(work)
            .map_err(|source| ConnectionError::Spawn {
                name: name.clone(),
                source,
            })?;
        trace!(worker = %name, "worker started");
        Ok(Worker { name, handle })
    }
}

/// Handle to a running background worker.
///
/// Workers cannot be interrupted from the outside. Whoever owns the work must
/// first make it return (set a flag, close a channel) and then call
/// [`stop`](Worker::stop) to wait for it.
#[derive(Debug)]
pub struct Worker {
    name: String,
    handle: JoinHandle<()>,
}

impl Worker {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the worker's closure has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker to exit.
    ///
    /// Called from the worker's own thread this returns immediately instead
    /// of deadlocking; the thread exits on its own once its closure returns.
    pub fn stop(self) -> Result<()> {
        if self.handle.thread().id() == thread::current().id() {
            debug!(worker = %self.name, "worker stopped from its own thread; not joining");
            return Ok(());
        }
        self.handle
            .join()
            .map_err(|_| ConnectionError::WorkerPanicked(self.name.clone()))?;
        trace!(worker = %self.name, "worker stopped");
        Ok(())
    }
}
