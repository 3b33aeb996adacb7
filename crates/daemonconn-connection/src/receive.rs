use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use daemonconn_protocol::Message;
use tracing::debug;

use crate::error::{ConnectionError, Result};
use crate::stoppable::Stoppable;

enum Entry {
    Message(Message),
    Failure(ConnectionError),
    End,
}

#[derive(Default)]
struct ReceiveState {
    entries: VecDeque<Entry>,
    /// The end marker has been appended; no more messages are accepted.
    terminated: bool,
    /// The connection's own end of stream has been recorded.
    disconnected: bool,
}

impl ReceiveState {
    fn terminate(&mut self) {
        if !self.terminated {
            self.entries.push_back(Entry::End);
            self.terminated = true;
        }
    }
}

/// Blocking queue of protocol messages for the application.
///
/// Once the connection drops, the queue ends with at most one failure and
/// exactly one end marker. The end marker is never consumed, so every
/// later [`take`](ReceiveQueue::take) returns `Ok(None)` without waiting.
#[derive(Default)]
pub struct ReceiveQueue {
    state: Mutex<ReceiveState>,
    available: Condvar,
}

impl ReceiveQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ReceiveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message. Ignored once the queue has terminated.
    pub fn add(&self, message: Message) {
        let mut state = self.lock();
        if state.terminated {
            debug!(
                message = message.variant_name(),
                "receive queue terminated; dropping message"
            );
            return;
        }
        state.entries.push_back(Entry::Message(message));
        self.available.notify_all();
    }

    /// Terminate the queue after the messages already in it.
    ///
    /// A `failure` is surfaced by the next [`take`](Self::take) that reaches
    /// it, even if [`stop`](Stoppable::stop) already ended the queue. Only the
    /// first call has an effect.
    pub fn disconnect(&self, failure: Option<ConnectionError>) {
        let mut state = self.lock();
        if state.disconnected {
            return;
        }
        state.disconnected = true;
        if let Some(failure) = failure {
            // The end marker, if present, is always last.
            let end = state.entries.len() - usize::from(state.terminated);
            state.entries.insert(end, Entry::Failure(failure));
        }
        state.terminate();
        self.available.notify_all();
    }

    /// Wait up to `timeout` for the next message.
    ///
    /// Returns `Ok(None)` on timeout or at the end of the stream, and the
    /// recorded failure, once, when it is reached.
    pub fn take(&self, timeout: Duration) -> Result<Option<Message>> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.lock();
        loop {
            match state.entries.pop_front() {
                Some(Entry::Message(message)) => return Ok(Some(message)),
                Some(Entry::Failure(failure)) => return Err(failure),
                Some(Entry::End) => {
                    state.entries.push_front(Entry::End);
                    return Ok(None);
                }
                None => {}
            }

            state = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                    self.available
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Whether the end marker has been appended.
    pub fn is_terminated(&self) -> bool {
        self.lock().terminated
    }
}

impl Stoppable for ReceiveQueue {
    /// Terminate the queue so that blocked and future receivers return.
    ///
    /// A later [`disconnect`](ReceiveQueue::disconnect) may still record a
    /// failure ahead of the end marker.
    fn stop(&self) -> Result<()> {
        let mut state = self.lock();
        state.terminate();
        self.available.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use daemonconn_protocol::{ProtocolError, ProtocolMessage};
    use daemonconn_transport::TransportError;

    use super::*;

    fn protocol(kind: &str) -> Message {
        Message::Protocol(ProtocolMessage::new(kind, None))
    }

    fn receive_failure() -> ConnectionError {
        ConnectionError::Receive(TransportError::Protocol(ProtocolError::Truncated(3)))
    }

    #[test]
    fn returns_messages_in_order() {
        let queue = ReceiveQueue::new();
        queue.add(protocol("one"));
        queue.add(protocol("two"));

        assert_eq!(queue.take(Duration::ZERO).unwrap(), Some(protocol("one")));
        assert_eq!(queue.take(Duration::ZERO).unwrap(), Some(protocol("two")));
    }

    #[test]
    fn times_out_when_empty() {
        let queue = ReceiveQueue::new();
        let started = Instant::now();
        assert_eq!(queue.take(Duration::from_millis(30)).unwrap(), None);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn queued_messages_survive_disconnect() {
        let queue = ReceiveQueue::new();
        queue.add(protocol("build"));
        queue.disconnect(None);
        queue.add(protocol("too-late"));

        assert_eq!(queue.take(Duration::ZERO).unwrap(), Some(protocol("build")));
        assert_eq!(queue.take(Duration::ZERO).unwrap(), None);
    }

    #[test]
    fn end_marker_is_sticky_for_any_timeout() {
        let queue = ReceiveQueue::new();
        queue.disconnect(None);

        let started = Instant::now();
        for timeout in [Duration::ZERO, Duration::from_secs(60), Duration::MAX] {
            assert_eq!(queue.take(timeout).unwrap(), None);
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn failure_is_raised_once_then_end() {
        let queue = ReceiveQueue::new();
        queue.disconnect(Some(receive_failure()));

        let err = queue.take(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ConnectionError::Receive(_)));
        assert_eq!(queue.take(Duration::from_secs(1)).unwrap(), None);
        assert_eq!(queue.take(Duration::ZERO).unwrap(), None);
    }

    #[test]
    fn only_first_disconnect_counts() {
        let queue = ReceiveQueue::new();
        queue.disconnect(None);
        queue.disconnect(Some(receive_failure()));
        assert_eq!(queue.take(Duration::ZERO).unwrap(), None);
        assert!(queue.is_terminated());
    }

    #[test]
    fn failure_recorded_after_stop_is_still_raised() {
        let queue = ReceiveQueue::new();
        queue.add(protocol("build"));
        queue.stop().unwrap();
        queue.disconnect(Some(receive_failure()));

        assert_eq!(queue.take(Duration::ZERO).unwrap(), Some(protocol("build")));
        let err = queue.take(Duration::ZERO).unwrap_err();
        assert!(matches!(err, ConnectionError::Receive(_)));
        assert_eq!(queue.take(Duration::ZERO).unwrap(), None);
        assert_eq!(queue.take(Duration::ZERO).unwrap(), None);
    }

    #[test]
    fn disconnect_wakes_blocked_receiver() {
        let queue = Arc::new(ReceiveQueue::new());
        let receiver = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.take(Duration::from_secs(30)))
        };

        thread::sleep(Duration::from_millis(30));
        queue.stop().unwrap();

        assert_eq!(receiver.join().unwrap().unwrap(), None);
    }

    #[test]
    fn add_wakes_blocked_receiver() {
        let queue = Arc::new(ReceiveQueue::new());
        let receiver = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.take(Duration::from_secs(30)))
        };

        thread::sleep(Duration::from_millis(30));
        queue.add(protocol("wake"));

        assert_eq!(receiver.join().unwrap().unwrap(), Some(protocol("wake")));
    }
}
