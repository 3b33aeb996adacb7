//! Multiplexed build daemon connection.
//!
//! A [`DaemonConnection`] owns one raw channel and runs the only receive loop
//! on it. Every inbound message is classified and routed to one of four
//! independently consumed streams:
//! - stdin forwarding, delivered to a [`StdinHandler`]
//! - cancel signals, delivered to a one-shot [`CancelHandler`]
//! - disconnect, delivered once to a [`DisconnectHandler`]
//! - everything else, pulled with [`DaemonConnection::receive`]
//!
//! Each stream preserves receive order, handlers can be attached and detached
//! at any time, and [`DaemonConnection::stop`] tears everything down in a
//! fixed order without delivering anything twice.

pub mod cancel;
pub mod command_queue;
pub mod connection;
pub mod disconnect;
pub mod error;
pub mod executor;
pub mod receive;
pub mod stdin;
pub mod stoppable;

pub use cancel::{CancelHandler, CancelQueue};
pub use command_queue::{CommandQueue, Flow, QueueStrategy};
pub use connection::{ConnectionConfig, DaemonConnection};
pub use disconnect::{DisconnectHandler, DisconnectNotifier};
pub use error::{ConnectionError, HandlerError, HandlerResult, Result};
pub use executor::{Executor, Worker};
pub use receive::ReceiveQueue;
pub use stdin::{StdinHandler, StdinQueue};
pub use stoppable::{CompositeStoppable, Stoppable};
