//! Multiplexed build daemon connections.
//!
//! A daemon serves each client over one duplex channel. daemonconn splits that
//! channel into independently consumed streams (forwarded stdin, cancel
//! requests, disconnect notification, build protocol messages) and tears them
//! down in a fixed order.
//!
//! # Crate Structure
//!
//! - [`protocol`]: message model and JSON-lines codec
//! - [`transport`]: raw channels (Unix domain sockets, in-memory pairs)
//! - [`connection`]: the per-client [`DaemonConnection`] and its queues
//!
//! ```no_run
//! # #[cfg(unix)]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::time::Duration;
//!
//! use daemonconn::transport::UnixChannelListener;
//! use daemonconn::DaemonConnection;
//!
//! let listener = UnixChannelListener::bind("/tmp/daemon.sock")?;
//! let connection = DaemonConnection::new(listener.accept()?)?;
//! while let Some(message) = connection.receive(Duration::from_secs(1))? {
//!     println!("{}", message.variant_name());
//! }
//! connection.stop()?;
//! # Ok(())
//! # }
//! # #[cfg(not(unix))]
//! # fn main() {}
//! ```

/// Re-export protocol types.
pub mod protocol {
    pub use daemonconn_protocol::*;
}

/// Re-export transport types.
pub mod transport {
    pub use daemonconn_transport::*;
}

/// Re-export connection types.
pub mod connection {
    pub use daemonconn_connection::*;
}

pub use daemonconn_connection::{ConnectionConfig, DaemonConnection};
