use std::sync::Arc;

use daemonconn_protocol::Message;

use crate::error::Result;

/// A duplex channel of whole messages.
///
/// Implementations are shared between one receiving thread and any number of
/// sending threads, so every method takes `&self` and the implementation owns
/// its locking.
pub trait RawChannel: Send + Sync {
    /// Block until the next message arrives.
    ///
    /// Returns `Ok(None)` at a clean end of stream, including after [`close`](Self::close).
    fn receive(&self) -> Result<Option<Message>>;

    /// Send one message to the other end.
    fn dispatch(&self, message: Message) -> Result<()>;

    /// Close the channel. A blocked [`receive`](Self::receive) returns `Ok(None)`.
    ///
    /// Closing twice is a no-op.
    fn close(&self) -> Result<()>;
}

impl<T: RawChannel + ?Sized> RawChannel for Arc<T> {
    fn receive(&self) -> Result<Option<Message>> {
        (**self).receive()
    }

    fn dispatch(&self, message: Message) -> Result<()> {
        (**self).dispatch(message)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}

impl<T: RawChannel + ?Sized> RawChannel for Box<T> {
    fn receive(&self) -> Result<Option<Message>> {
        (**self).receive()
    }

    fn dispatch(&self, message: Message) -> Result<()> {
        (**self).dispatch(message)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}
