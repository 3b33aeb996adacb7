//! The connection orchestrator.
//!
//! Lifecycle: open (receive loop running), draining (loop exited, every stream
//! told about the disconnect), stopped (after [`DaemonConnection::stop`]).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use daemonconn_protocol::{
    BuildEvent, BuildResult, BuildStarted, DaemonUnavailable, LogEvent, Message, Routed,
};
use daemonconn_transport::RawChannel;
use tracing::{debug, trace, warn};

use crate::cancel::{CancelHandler, CancelQueue};
use crate::disconnect::{DisconnectHandler, DisconnectNotifier};
use crate::error::{ConnectionError, Result};
use crate::executor::{Executor, Worker};
use crate::receive::ReceiveQueue;
use crate::stdin::{StdinHandler, StdinQueue};
use crate::stoppable::CompositeStoppable;

/// Settings for a [`DaemonConnection`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Names the receive loop thread (`Handler for <name>`) and log spans.
    pub name: String,
    /// Spawns the receive loop and handler workers.
    pub executor: Executor,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: "client".to_string(),
            executor: Executor::new(),
        }
    }
}

impl ConnectionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// The four logical streams fed by the receive loop.
struct Streams {
    stdin: StdinQueue,
    cancel: CancelQueue,
    disconnect: DisconnectNotifier,
    receive: ReceiveQueue,
}

impl Streams {
    fn route(&self, message: Message) {
        let variant = message.variant_name();
        match message.route() {
            Routed::Io(command) => {
                debug!(message = variant, "received IO message from client");
                self.stdin.add(command);
            }
            Routed::Cancel(signal) => {
                debug!(message = variant, "received cancel message from client");
                self.cancel.add(signal);
            }
            Routed::Other(message) => {
                debug!(message = variant, "received protocol message from client");
                self.receive.add(message);
            }
        }
    }
}

/// Runs the disconnect cascade when the receive loop unwinds, however it exits.
struct DisconnectOnExit<'a> {
    streams: &'a Streams,
    failure: Option<ConnectionError>,
}

impl Drop for DisconnectOnExit<'_> {
    fn drop(&mut self) {
        self.streams.stdin.disconnect();
        self.streams.cancel.disconnect();
        self.streams.disconnect.disconnect();
        self.streams.receive.disconnect(self.failure.take());
    }
}

fn receive_loop<C: RawChannel>(channel: &C, streams: &Streams) {
    let mut exit = DisconnectOnExit {
        streams,
        failure: None,
    };
    loop {
        match channel.receive() {
            Ok(Some(message)) => streams.route(message),
            Ok(None) => {
                debug!("received end-of-input from client");
                break;
            }
            Err(err) => {
                debug!(error = %err, "could not receive message from client");
                exit.failure = Some(ConnectionError::Receive(err));
                break;
            }
        }
    }
}

/// One daemon-side client connection, multiplexed over a single raw channel.
///
/// Construction starts the receive loop; [`stop`](Self::stop) (or drop) ends
/// it. Handlers may be attached and detached from any thread at any time.
pub struct DaemonConnection<C: RawChannel + 'static> {
    name: String,
    channel: Arc<C>,
    streams: Arc<Streams>,
    receiver: Mutex<Option<Worker>>,
    stopped: AtomicBool,
}

impl<C: RawChannel + 'static> DaemonConnection<C> {
    /// Wrap `channel` with the default configuration.
    pub fn new(channel: C) -> Result<Self> {
        Self::with_config(channel, ConnectionConfig::default())
    }

    pub fn with_config(channel: C, config: ConnectionConfig) -> Result<Self> {
        let ConnectionConfig { name, executor } = config;
        let channel = Arc::new(channel);
        let streams = Arc::new(Streams {
            stdin: StdinQueue::new(executor.clone()),
            cancel: CancelQueue::new(executor.clone()),
            disconnect: DisconnectNotifier::new(),
            receive: ReceiveQueue::new(),
        });

        let receiver = {
            let channel = Arc::clone(&channel);
            let streams = Arc::clone(&streams);
            executor.spawn(format!("Handler for {name}"), move || {
                receive_loop(channel.as_ref(), &streams)
            })?
        };
        debug!(connection = %name, "connection opened");

        Ok(Self {
            name,
            channel,
            streams,
            receiver: Mutex::new(Some(receiver)),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach a stdin handler, or detach the current one with `None`.
    ///
    /// Detaching blocks until an in-flight call returns.
    pub fn on_stdin(&self, handler: Option<Box<dyn StdinHandler>>) -> Result<()> {
        self.streams.stdin.use_handler(handler)
    }

    /// Attach a cancel handler, or detach the current one with `None`.
    pub fn on_cancel(&self, handler: Option<CancelHandler>) -> Result<()> {
        self.streams.cancel.use_handler(handler)
    }

    /// Attach a disconnect handler, or detach the current one with `None`.
    ///
    /// If the client has already gone, the handler runs before this returns.
    pub fn on_disconnect(&self, handler: Option<DisconnectHandler>) -> Result<()> {
        self.streams.disconnect.use_handler(handler)
    }

    /// Wait up to `timeout` for the next build protocol message.
    ///
    /// `Ok(None)` means the wait timed out or the client is gone for good.
    /// A receive failure is returned once, after any messages read before it.
    pub fn receive(&self, timeout: Duration) -> Result<Option<Message>> {
        self.streams.receive.take(timeout)
    }

    /// Whether the receive loop has observed the end of the connection.
    pub fn is_disconnected(&self) -> bool {
        self.streams.disconnect.is_disconnected()
    }

    pub fn daemon_unavailable(&self, message: DaemonUnavailable) -> Result<()> {
        self.dispatch(Message::DaemonUnavailable(message))
    }

    pub fn build_started(&self, message: BuildStarted) -> Result<()> {
        self.dispatch(Message::BuildStarted(message))
    }

    pub fn log_event(&self, message: LogEvent) -> Result<()> {
        self.dispatch(Message::LogEvent(message))
    }

    /// Send an application event, wrapped in a [`BuildEvent`].
    pub fn event(&self, payload: serde_json::Value) -> Result<()> {
        self.dispatch(Message::BuildEvent(BuildEvent { payload }))
    }

    pub fn completed(&self, result: BuildResult) -> Result<()> {
        self.dispatch(Message::Result(result))
    }

    fn dispatch(&self, message: Message) -> Result<()> {
        trace!(
            connection = %self.name,
            message = message.variant_name(),
            "dispatching message to client"
        );
        self.channel.dispatch(message).map_err(ConnectionError::Send)
    }

    /// Tear the connection down.
    ///
    /// Steps run in a fixed order, each after the previous one completes:
    /// disconnect handler, raw channel, receive loop, receive queue, stdin
    /// handler, cancel handler. A failing step does not skip the rest.
    /// Calls after the first return `Ok(())` immediately.
    pub fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(connection = %self.name, "stopping connection");

        let close_channel =
            || -> Result<()> { self.channel.close().map_err(ConnectionError::Close) };
        let stop_receiver = || -> Result<()> {
            let worker = self
                .receiver
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            match worker {
                Some(worker) => worker.stop(),
                None => Ok(()),
            }
        };

        CompositeStoppable::new()
            .add("disconnect handler", &self.streams.disconnect)
            .add("channel", &close_channel)
            .add("receive loop", &stop_receiver)
            .add("receive queue", &self.streams.receive)
            .add("stdin handler", &self.streams.stdin)
            .add("cancel handler", &self.streams.cancel)
            .stop()
    }
}

impl<C: RawChannel + 'static> Drop for DaemonConnection<C> {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(connection = %self.name, error = %err, "failed to stop connection");
        }
    }
}

impl<C: RawChannel + 'static> std::fmt::Debug for DaemonConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonConnection")
            .field("name", &self.name)
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use daemonconn_protocol::{CancelSignal, InputChunk, LogLevel, ProtocolMessage};
    use daemonconn_transport::MemoryChannel;
    use serde_json::json;

    use super::*;
    use crate::error::HandlerResult;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn open(name: &str) -> (DaemonConnection<MemoryChannel>, MemoryChannel) {
        let (daemon, client) = MemoryChannel::pair();
        let connection =
            DaemonConnection::with_config(daemon, ConnectionConfig::new(name)).unwrap();
        (connection, client)
    }

    #[test]
    fn cancel_handler_runs_on_its_own_worker() {
        let (connection, client) = open("worker-7");
        let (tx, rx) = mpsc::channel();
        connection
            .on_cancel(Some(Box::new(move |_: CancelSignal| -> HandlerResult {
                tx.send(std::thread::current().name().map(str::to_string))?;
                Ok(())
            })))
            .unwrap();

        client
            .dispatch(Message::CancelSignal(CancelSignal::default()))
            .unwrap();

        assert_eq!(
            rx.recv_timeout(TIMEOUT).unwrap().as_deref(),
            Some("Cancel handler")
        );
        assert_eq!(connection.name(), "worker-7");
        connection.stop().unwrap();
    }

    #[test]
    fn protocol_messages_reach_receive() {
        let (connection, client) = open("client");
        let build = Message::Protocol(ProtocolMessage::new("build", Some(json!({"tasks": []}))));
        client.dispatch(build.clone()).unwrap();

        assert_eq!(connection.receive(TIMEOUT).unwrap(), Some(build));
        assert_eq!(connection.receive(Duration::from_millis(20)).unwrap(), None);
        connection.stop().unwrap();
    }

    #[test]
    fn outbound_sends_reach_client_in_order() {
        let (connection, client) = open("client");
        connection
            .build_started(BuildStarted {
                build_id: "b-1".to_string(),
            })
            .unwrap();
        connection
            .log_event(LogEvent {
                level: LogLevel::Lifecycle,
                message: "configuring".to_string(),
            })
            .unwrap();
        connection.event(json!({"progress": 50})).unwrap();
        connection
            .completed(BuildResult::success(Some(json!(0))))
            .unwrap();

        let received: Vec<&'static str> = (0..4)
            .map(|_| client.receive().unwrap().unwrap().variant_name())
            .collect();
        assert_eq!(
            received,
            vec!["build_started", "log_event", "build_event", "result"]
        );
        connection.stop().unwrap();
    }

    #[test]
    fn event_is_wrapped_in_build_event() {
        let (connection, client) = open("client");
        connection.event(json!({"task": ":compile"})).unwrap();

        assert_eq!(
            client.receive().unwrap(),
            Some(Message::BuildEvent(BuildEvent {
                payload: json!({"task": ":compile"})
            }))
        );
        connection.stop().unwrap();
    }

    #[test]
    fn send_failure_is_returned_to_caller() {
        let (connection, client) = open("client");
        client.close().unwrap();

        let err = connection
            .daemon_unavailable(DaemonUnavailable {
                reason: "busy".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Send(_)));
        connection.stop().unwrap();
    }

    #[test]
    fn client_close_marks_connection_disconnected() {
        let (connection, client) = open("client");
        client.close().unwrap();

        assert_eq!(connection.receive(TIMEOUT).unwrap(), None);
        assert!(connection.is_disconnected());
        connection.stop().unwrap();
    }

    #[test]
    fn stop_is_idempotent_and_unblocks_receive() {
        let (connection, _client) = open("client");
        let connection = Arc::new(connection);

        let receiver = {
            let connection = Arc::clone(&connection);
            std::thread::spawn(move || connection.receive(Duration::from_secs(30)))
        };
        std::thread::sleep(Duration::from_millis(30));

        connection.stop().unwrap();
        connection.stop().unwrap();
        assert_eq!(receiver.join().unwrap().unwrap(), None);
    }

    #[test]
    fn double_attach_is_a_usage_error() {
        let (connection, _client) = open("client");
        let noop = || -> CancelHandler { Box::new(|_: CancelSignal| -> HandlerResult { Ok(()) }) };
        connection.on_cancel(Some(noop())).unwrap();

        let err = connection.on_cancel(Some(noop())).unwrap_err();
        assert!(err.is_usage_error());
        connection.stop().unwrap();
    }

    #[test]
    fn attach_after_stop_is_rejected() {
        let (connection, _client) = open("client");
        connection.stop().unwrap();

        struct Ignore;
        impl StdinHandler for Ignore {
            fn on_input(&mut self, _: InputChunk) -> HandlerResult {
                Ok(())
            }
            fn on_end_of_input(&mut self, _: daemonconn_protocol::EndOfInput) -> HandlerResult {
                Ok(())
            }
        }
        let err = connection.on_stdin(Some(Box::new(Ignore))).unwrap_err();
        assert!(matches!(err, ConnectionError::QueueStopped { .. }));
    }

    #[test]
    fn dropping_connection_closes_channel() {
        let (connection, client) = open("client");
        drop(connection);
        assert_eq!(client.receive().unwrap(), None);
    }
}
