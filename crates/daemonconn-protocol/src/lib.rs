//! Message model and wire codec for build daemon connections.
//!
//! Every message travels as one JSON object per line, tagged by a `"type"`
//! field. The receive side classifies each message into one of three logical
//! streams:
//! - IO commands (forwarded stdin and end-of-input)
//! - cancel signals
//! - everything else (build protocol messages)

pub mod codec;
pub mod error;
pub mod message;
pub mod reader;
pub mod writer;

pub use codec::{decode_message, encode_message, CodecConfig, DEFAULT_MAX_MESSAGE_SIZE};
pub use error::{ProtocolError, Result};
pub use message::{
    BuildEvent, BuildResult, BuildStarted, CancelSignal, DaemonUnavailable, EndOfInput,
    InputChunk, IoCommand, LogEvent, LogLevel, Message, MessageKind, ProtocolMessage, Routed,
};
pub use reader::JsonLinesReader;
pub use writer::JsonLinesWriter;
