use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Reason attached to the end-of-input marker synthesized when a client drops.
pub const DISCONNECTED_REASON: &str = "<disconnected>";

/// A message exchanged between the build daemon and one of its clients.
///
/// The wire form is a JSON object tagged by `"type"`:
/// ```text
/// {"type":"input_chunk","data":[104,105]}
/// {"type":"protocol","kind":"build","payload":{"tasks":["check"]}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Bytes read from the client's standard input.
    InputChunk(InputChunk),
    /// The client's standard input reached end of file.
    EndOfInput(EndOfInput),
    /// The client asked the daemon to cancel the running build.
    CancelSignal(CancelSignal),
    /// The daemon cannot take the request.
    DaemonUnavailable(DaemonUnavailable),
    /// The daemon accepted the request and started a build.
    BuildStarted(BuildStarted),
    /// Log output produced while building.
    LogEvent(LogEvent),
    /// An application-level event, wrapped for transport.
    BuildEvent(BuildEvent),
    /// The final outcome of a request.
    Result(BuildResult),
    /// Any other build protocol message.
    Protocol(ProtocolMessage),
}

/// Structural classification of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Stdin forwarding: [`InputChunk`] or [`EndOfInput`].
    Io,
    /// A [`CancelSignal`].
    Cancel,
    /// Everything else.
    Other,
}

/// A message split by classification, ready for routing.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Io(IoCommand),
    Cancel(CancelSignal),
    Other(Message),
}

/// A command destined for the stdin handler.
#[derive(Debug, Clone, PartialEq)]
pub enum IoCommand {
    Input(InputChunk),
    EndOfInput(EndOfInput),
}

impl Message {
    /// Classify this message without consuming it.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::InputChunk(_) | Message::EndOfInput(_) => MessageKind::Io,
            Message::CancelSignal(_) => MessageKind::Cancel,
            _ => MessageKind::Other,
        }
    }

    /// Consume this message and split it by classification.
    pub fn route(self) -> Routed {
        match self {
            Message::InputChunk(chunk) => Routed::Io(IoCommand::Input(chunk)),
            Message::EndOfInput(end) => Routed::Io(IoCommand::EndOfInput(end)),
            Message::CancelSignal(cancel) => Routed::Cancel(cancel),
            other => Routed::Other(other),
        }
    }

    /// Short, stable name of the variant (matches the wire tag).
    pub fn variant_name(&self) -> &'static str {
        match self {
            Message::InputChunk(_) => "input_chunk",
            Message::EndOfInput(_) => "end_of_input",
            Message::CancelSignal(_) => "cancel_signal",
            Message::DaemonUnavailable(_) => "daemon_unavailable",
            Message::BuildStarted(_) => "build_started",
            Message::LogEvent(_) => "log_event",
            Message::BuildEvent(_) => "build_event",
            Message::Result(_) => "result",
            Message::Protocol(_) => "protocol",
        }
    }
}

impl From<IoCommand> for Message {
    fn from(command: IoCommand) -> Self {
        match command {
            IoCommand::Input(chunk) => Message::InputChunk(chunk),
            IoCommand::EndOfInput(end) => Message::EndOfInput(end),
        }
    }
}

/// Forwarded standard input bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputChunk {
    pub data: Bytes,
}

impl InputChunk {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

/// End-of-input marker for forwarded standard input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndOfInput {
    pub reason: String,
}

impl EndOfInput {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// The marker injected when the connection drops mid-stream.
    pub fn disconnected() -> Self {
        Self::new(DISCONNECTED_REASON)
    }

    /// Whether this marker was synthesized because the client disconnected.
    pub fn is_disconnect(&self) -> bool {
        self.reason == DISCONNECTED_REASON
    }
}

/// Client request to cancel the current build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelSignal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonUnavailable {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStarted {
    pub build_id: String,
}

/// Severity of a [`LogEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Lifecycle,
    Info,
    Debug,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
}

/// Envelope for arbitrary application events sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildEvent {
    pub payload: serde_json::Value,
}

/// Outcome of a client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl BuildResult {
    pub fn success(value: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            value,
            failure: None,
        }
    }

    pub fn failure(failure: impl Into<String>) -> Self {
        Self {
            success: false,
            value: None,
            failure: Some(failure.into()),
        }
    }
}

/// A build protocol message this layer does not interpret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ProtocolMessage {
    pub fn new(kind: impl Into<String>, payload: Option<serde_json::Value>) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}
