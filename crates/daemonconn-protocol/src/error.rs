/// Errors that can occur while encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The encoded message exceeds the configured maximum size.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// A line could not be parsed as a message, or a message could not be encoded.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred while reading or writing messages.
    #[error("protocol I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended in the middle of a message.
    #[error("connection closed (incomplete message, {0} bytes buffered)")]
    Truncated(usize),

    /// The peer stopped accepting bytes.
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
