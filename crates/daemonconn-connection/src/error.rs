use daemonconn_transport::TransportError;

/// Failure returned by an application handler.
///
/// Handler failures are logged and swallowed where the handler is invoked;
/// they never reach the caller of a connection operation.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// What every handler callback returns.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Errors that can occur in connection operations.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Reading from the raw channel failed. Surfaced once through `receive`.
    #[error("could not receive message from client: {0}")]
    Receive(#[source] TransportError),

    /// Writing to the raw channel failed. Returned to the sender, never retried.
    #[error("could not dispatch message to client: {0}")]
    Send(#[source] TransportError),

    /// Closing the raw channel failed.
    #[error("could not close connection: {0}")]
    Close(#[source] TransportError),

    /// A handler was attached while another one is still attached.
    #[error("more instances of {queue} not supported")]
    HandlerAlreadyAttached { queue: &'static str },

    /// A handler was attached to a queue that has already been stopped.
    #[error("{queue} has been stopped")]
    QueueStopped { queue: &'static str },

    /// A background worker thread could not be started.
    #[error("failed to spawn worker {name}: {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },

    /// A background worker thread panicked.
    #[error("worker {0} panicked")]
    WorkerPanicked(String),

    /// One or more shutdown steps failed.
    #[error("shutdown failed: {}", .0.join("; "))]
    ShutdownFailed(Vec<String>),
}

impl ConnectionError {
    /// Whether this error reports misuse of the API rather than a runtime fault.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            ConnectionError::HandlerAlreadyAttached { .. } | ConnectionError::QueueStopped { .. }
        )
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub type Result<T> = std::result::Result<T, ConnectionError>;
