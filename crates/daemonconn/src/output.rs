use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use daemonconn::protocol::Message;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// The logical stream an observed event arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    Stdin,
    Cancel,
    Disconnect,
    Message,
}

impl Stream {
    fn as_str(self) -> &'static str {
        match self {
            Stream::Stdin => "stdin",
            Stream::Cancel => "cancel",
            Stream::Disconnect => "disconnect",
            Stream::Message => "message",
        }
    }
}

#[derive(Serialize)]
struct EventOutput<'a> {
    peer: &'a str,
    stream: Stream,
    kind: &'a str,
    detail: &'a str,
    timestamp: String,
}

/// Print one observed event. Safe to call from handler threads.
pub fn print_event(peer: &str, stream: Stream, kind: &str, detail: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = EventOutput {
                peer,
                stream,
                kind,
                detail,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PEER", "STREAM", "KIND", "DETAIL"])
                .add_row(vec![peer, stream.as_str(), kind, detail]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "peer={peer} stream={} kind={kind} detail={detail}",
                stream.as_str()
            );
        }
    }
}

pub fn print_message(peer: &str, message: &Message, format: OutputFormat) {
    print_event(
        peer,
        Stream::Message,
        message.variant_name(),
        &message_detail(message),
        format,
    );
}

/// Message body without its type tag; input bytes are shown as text when possible.
pub fn message_detail(message: &Message) -> String {
    if let Message::InputChunk(chunk) = message {
        return payload_preview(&chunk.data);
    }
    match serde_json::to_value(message) {
        Ok(mut value) => {
            if let Some(fields) = value.as_object_mut() {
                fields.remove("type");
            }
            value.to_string()
        }
        Err(_) => String::new(),
    }
}

pub fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
