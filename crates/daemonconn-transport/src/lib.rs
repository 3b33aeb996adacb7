//! Raw duplex message channels.
//!
//! A [`RawChannel`] moves whole [`Message`](daemonconn_protocol::Message)s in
//! both directions. It is the only thing the connection core knows about the
//! wire:
//! - [`UnixChannel`] speaks JSON lines over a Unix domain socket
//! - [`MemoryChannel`] connects two endpoints inside one process

pub mod channel;
pub mod error;
pub mod memory;

#[cfg(unix)]
pub mod uds;

pub use channel::RawChannel;
pub use error::{Result, TransportError};
pub use memory::MemoryChannel;

#[cfg(unix)]
pub use uds::{UnixChannel, UnixChannelListener};
