use crate::cmd::ServeArgs;
use crate::exit::CliResult;
use crate::output::OutputFormat;

#[cfg(unix)]
pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    unix::run(args, format)
}

#[cfg(not(unix))]
pub fn run(_args: ServeArgs, _format: OutputFormat) -> CliResult<i32> {
    Err(crate::exit::CliError::new(
        crate::exit::USAGE,
        "serve requires Unix domain sockets",
    ))
}

#[cfg(unix)]
mod unix {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use daemonconn::connection::{HandlerResult, Result as ConnectionResult, StdinHandler};
    use daemonconn::protocol::{
        BuildResult, BuildStarted, CancelSignal, DaemonUnavailable, EndOfInput, InputChunk,
        LogEvent, LogLevel, Message,
    };
    use daemonconn::transport::{RawChannel, UnixChannel, UnixChannelListener};
    use daemonconn::{ConnectionConfig, DaemonConnection};
    use serde_json::json;
    use tracing::{debug, info, warn};

    use crate::cmd::{parse_duration, ServeArgs, BUILD_REQUEST};
    use crate::exit::{connection_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
    use crate::output::{payload_preview, print_event, print_message, OutputFormat, Stream};

    pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
        let receive_timeout = parse_duration(&args.receive_timeout)?;

        // Installed before bind so an interrupt never hits the default action.
        let running = Arc::new(AtomicBool::new(true));
        install_ctrlc_handler(Arc::clone(&running), args.path.clone())?;

        let listener = UnixChannelListener::bind(&args.path)
            .map_err(|err| transport_error("bind failed", err))?;
        info!(path = %listener.path().display(), "serving");

        let mut served = 0usize;
        while running.load(Ordering::SeqCst) {
            let channel = listener
                .accept()
                .map_err(|err| transport_error("accept failed", err))?;
            if !running.load(Ordering::SeqCst) {
                debug!("interrupted; not serving the last connection");
                break;
            }
            served = served.saturating_add(1);

            let peer = format!("client-{served}");
            serve_client(channel, &peer, receive_timeout, &running, format)?;

            if args.count.is_some_and(|count| served >= count) {
                break;
            }
        }

        Ok(SUCCESS)
    }

    fn serve_client(
        channel: UnixChannel,
        peer: &str,
        receive_timeout: Duration,
        running: &AtomicBool,
        format: OutputFormat,
    ) -> CliResult<()> {
        let connection = DaemonConnection::with_config(channel, ConnectionConfig::new(peer))
            .map_err(|err| connection_error("connection setup failed", err))?;
        attach_printers(&connection, peer, format)
            .map_err(|err| connection_error("attach failed", err))?;
        debug!(peer, "client connected");

        let mut builds = 0u64;
        // Set once the client is gone; remaining messages are drained without waiting.
        let mut draining = false;
        while running.load(Ordering::SeqCst) {
            let timeout = if draining {
                Duration::ZERO
            } else {
                receive_timeout
            };
            match connection.receive(timeout) {
                Ok(Some(message)) => {
                    print_message(peer, &message, format);
                    if let Err(err) = respond(&connection, peer, &mut builds, message) {
                        warn!(peer, error = %err, "could not reply to client");
                    }
                }
                Ok(None) if draining => break,
                Ok(None) => draining = connection.is_disconnected(),
                Err(err) => {
                    warn!(peer, error = %err, "client connection failed");
                    draining = true;
                }
            }
        }

        debug!(peer, builds, "client finished");
        connection
            .stop()
            .map_err(|err| connection_error("shutdown failed", err))
    }

    struct PrintStdin {
        peer: String,
        format: OutputFormat,
    }

    impl StdinHandler for PrintStdin {
        fn on_input(&mut self, input: InputChunk) -> HandlerResult {
            print_event(
                &self.peer,
                Stream::Stdin,
                "input_chunk",
                &payload_preview(&input.data),
                self.format,
            );
            Ok(())
        }

        fn on_end_of_input(&mut self, end: EndOfInput) -> HandlerResult {
            print_event(
                &self.peer,
                Stream::Stdin,
                "end_of_input",
                &end.reason,
                self.format,
            );
            Ok(())
        }
    }

    fn attach_printers<C: RawChannel + 'static>(
        connection: &DaemonConnection<C>,
        peer: &str,
        format: OutputFormat,
    ) -> ConnectionResult<()> {
        connection.on_stdin(Some(Box::new(PrintStdin {
            peer: peer.to_string(),
            format,
        })))?;

        let cancel_peer = peer.to_string();
        connection.on_cancel(Some(Box::new(
            move |signal: CancelSignal| -> HandlerResult {
                let reason = signal.reason.unwrap_or_default();
                print_event(&cancel_peer, Stream::Cancel, "cancel_signal", &reason, format);
                Ok(())
            },
        )))?;

        let disconnect_peer = peer.to_string();
        connection.on_disconnect(Some(Box::new(move || -> HandlerResult {
            print_event(&disconnect_peer, Stream::Disconnect, "disconnected", "", format);
            Ok(())
        })))
    }

    /// Answer a build request with the full reply sequence; refuse anything else.
    fn respond<C: RawChannel + 'static>(
        connection: &DaemonConnection<C>,
        peer: &str,
        builds: &mut u64,
        message: Message,
    ) -> ConnectionResult<()> {
        let Message::Protocol(request) = message else {
            return Ok(());
        };
        if request.kind != BUILD_REQUEST {
            return connection.daemon_unavailable(DaemonUnavailable {
                reason: format!("unsupported request kind: {}", request.kind),
            });
        }

        *builds += 1;
        let build_id = format!("{peer}-build-{builds}");
        connection.build_started(BuildStarted {
            build_id: build_id.clone(),
        })?;
        connection.log_event(LogEvent {
            level: LogLevel::Lifecycle,
            message: format!("running {build_id}"),
        })?;
        connection.event(request.payload.unwrap_or_default())?;
        connection.completed(BuildResult::success(Some(json!({ "build_id": build_id }))))
    }

    /// Clear `running` on Ctrl-C and wake a blocked `accept` by connecting to it.
    fn install_ctrlc_handler(running: Arc<AtomicBool>, path: PathBuf) -> CliResult<()> {
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
            if let Err(err) = UnixChannel::connect(&path) {
                debug!(error = %err, "could not wake listener");
            }
        })
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
    }
}
