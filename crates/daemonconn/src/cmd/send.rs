use std::io::{self, Read};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use daemonconn::protocol::{EndOfInput, InputChunk, Message, ProtocolMessage};
use daemonconn::transport::RawChannel;
use tracing::debug;

use crate::cmd::{SendArgs, BUILD_REQUEST};
use crate::exit::{
    io_error, transport_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{print_message, OutputFormat};

const STDIN_CHUNK_SIZE: usize = 8 * 1024;

/// Reason sent with end-of-input once local stdin is exhausted.
const STDIN_CLOSED: &str = "stdin closed";

/// Name the daemon side is shown as in printed replies.
const DAEMON_PEER: &str = "daemon";

#[cfg(unix)]
pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    use daemonconn::protocol::CancelSignal;
    use daemonconn::transport::UnixChannel;

    let wait_timeout = crate::cmd::parse_duration(&args.wait_timeout)?;
    let messages = resolve_messages(&args)?;
    let channel = Arc::new(
        UnixChannel::connect(&args.path).map_err(|err| transport_error("connect failed", err))?,
    );

    if args.stdin {
        forward_stdin(channel.as_ref(), io::stdin().lock())?;
    }
    for message in messages {
        dispatch(channel.as_ref(), message)?;
    }
    if args.cancel {
        dispatch(channel.as_ref(), Message::CancelSignal(CancelSignal::default()))?;
    }

    if args.wait {
        return wait_for_result(channel, wait_timeout, format);
    }
    channel
        .close()
        .map_err(|err| transport_error("close failed", err))?;
    Ok(SUCCESS)
}

#[cfg(not(unix))]
pub fn run(_args: SendArgs, _format: OutputFormat) -> CliResult<i32> {
    Err(CliError::new(USAGE, "send requires Unix domain sockets"))
}

/// Parse `--json` messages in order, followed by the `--build` request.
fn resolve_messages(args: &SendArgs) -> CliResult<Vec<Message>> {
    let mut messages = args
        .json
        .iter()
        .map(|json| {
            serde_json::from_str::<Message>(json)
                .map_err(|err| CliError::new(USAGE, format!("--json is not a valid message: {err}")))
        })
        .collect::<CliResult<Vec<_>>>()?;

    if let Some(payload) = &args.build {
        let payload = serde_json::from_str::<serde_json::Value>(payload)
            .map_err(|err| CliError::new(USAGE, format!("--build is not valid JSON: {err}")))?;
        messages.push(Message::Protocol(ProtocolMessage::new(
            BUILD_REQUEST,
            Some(payload),
        )));
    }
    Ok(messages)
}

fn dispatch<C: RawChannel>(channel: &C, message: Message) -> CliResult<()> {
    channel
        .dispatch(message)
        .map_err(|err| transport_error("send failed", err))
}

/// Forward everything readable from `input`, then end-of-input.
fn forward_stdin<C: RawChannel, R: Read>(channel: &C, mut input: R) -> CliResult<()> {
    let mut buf = vec![0u8; STDIN_CHUNK_SIZE];
    loop {
        let read = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(io_error("reading stdin failed", err)),
        };
        dispatch(channel, Message::InputChunk(InputChunk::new(buf[..read].to_vec())))?;
    }
    dispatch(channel, Message::EndOfInput(EndOfInput::new(STDIN_CLOSED)))
}

/// Print replies until a result arrives, the daemon hangs up, or `timeout` elapses.
///
/// Exits with [`FAILURE`] when the daemon is unavailable or the build failed.
fn wait_for_result<C: RawChannel + 'static>(
    channel: Arc<C>,
    timeout: Duration,
    format: OutputFormat,
) -> CliResult<i32> {
    let (tx, rx) = mpsc::channel();
    let reader = {
        let channel = Arc::clone(&channel);
        thread::Builder::new()
            .name("reply reader".to_string())
            .spawn(move || loop {
                let next = channel.receive();
                let finished = !matches!(next, Ok(Some(_)));
                if tx.send(next).is_err() || finished {
                    break;
                }
            })
            .map_err(|err| io_error("starting reply reader failed", err))?
    };

    let deadline = Instant::now() + timeout;
    let outcome = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(Ok(Some(message))) => {
                print_message(DAEMON_PEER, &message, format);
                match message {
                    Message::Result(result) if result.success => break Ok(SUCCESS),
                    Message::Result(_) | Message::DaemonUnavailable(_) => break Ok(FAILURE),
                    _ => {}
                }
            }
            Ok(Ok(None)) => {
                break Err(CliError::new(
                    FAILURE,
                    "daemon closed the connection before sending a result",
                ))
            }
            Ok(Err(err)) => break Err(transport_error("receive failed", err)),
            Err(RecvTimeoutError::Timeout) => {
                break Err(CliError::new(
                    TIMEOUT,
                    format!("no result within {}ms", timeout.as_millis()),
                ))
            }
            Err(RecvTimeoutError::Disconnected) => {
                break Err(CliError::new(INTERNAL, "reply reader stopped unexpectedly"))
            }
        }
    };

    if let Err(err) = channel.close() {
        debug!(error = %err, "close after wait failed");
    }
    if reader.join().is_err() {
        debug!("reply reader panicked");
    }
    outcome
}
