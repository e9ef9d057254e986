//! Outbound message queue for disconnection resilience.
//!
//! Buffers sends while the client is disconnected and flushes on reconnect.
//! Thread-safe: called from the scheduler and from adapter callback threads.
//! FIFO across the process; bounded only by memory; no deduplication.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::adapter::WhatsAppClient;

/// A message waiting to be sent.
#[derive(Debug, Clone)]
struct QueuedSend {
    to_jid: String,
    text: String,
}

#[derive(Default)]
struct Inner {
    queue: VecDeque<QueuedSend>,
    connected: bool,
    flushing: bool,
}

/// What happened to a `send` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the client successfully.
    Sent,
    /// Buffered: disconnected, or the client send failed.
    Queued,
}

#[derive(Default)]
pub struct OutboundQueue {
    inner: Mutex<Inner>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    fn enqueue(&self, to_jid: &str, text: &str) {
        let mut inner = self.lock();
        inner.queue.push_back(QueuedSend {
            to_jid: to_jid.to_string(),
            text: text.to_string(),
        });
        info!(
            to_jid,
            text_len = text.len(),
            queue_size = inner.queue.len(),
            "message queued"
        );
    }

    /// Send a message, buffering it when disconnected or when the client
    /// send fails. Never holds the lock across the client call.
    pub fn send(&self, client: &dyn WhatsAppClient, to_jid: &str, text: &str) -> SendOutcome {
        if !self.is_connected() {
            self.enqueue(to_jid, text);
            return SendOutcome::Queued;
        }
        match client.send_message(to_jid, text) {
            Ok(()) => {
                debug!(to_jid, text_len = text.len(), "message sent");
                SendOutcome::Sent
            }
            Err(err) => {
                self.enqueue(to_jid, text);
                warn!(to_jid, err = %err, "send failed, message queued");
                SendOutcome::Queued
            }
        }
    }

    /// Flush queued messages. Called on reconnect.
    ///
    /// Pops exactly the number of entries present at entry: `send` re-enqueues
    /// on failure, so an unbounded loop would spin forever against a target
    /// that keeps failing.
    pub fn flush(&self, client: &dyn WhatsAppClient) {
        let snapshot = {
            let mut inner = self.lock();
            if inner.flushing || inner.queue.is_empty() {
                return;
            }
            inner.flushing = true;
            inner.queue.len()
        };

        info!(count = snapshot, "flushing outbound queue");
        for _ in 0..snapshot {
            let Some(item) = self.lock().queue.pop_front() else {
                break;
            };
            self.send(client, &item.to_jid, &item.text);
        }
        self.lock().flushing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingClient;

    #[test]
    fn disconnected_sends_are_queued_then_flushed_in_order() {
        let queue = OutboundQueue::new();
        let client = RecordingClient::default();

        queue.send(&client, "x@g.us", "a");
        queue.send(&client, "x@g.us", "b");
        assert_eq!(queue.len(), 2);
        assert!(client.sent().is_empty());

        queue.set_connected(true);
        queue.flush(&client);

        assert_eq!(queue.len(), 0);
        assert_eq!(
            client.sent(),
            vec![
                ("x@g.us".to_string(), "a".to_string()),
                ("x@g.us".to_string(), "b".to_string()),
            ]
        );
    }

    #[test]
    fn connected_send_does_not_enqueue() {
        let queue = OutboundQueue::new();
        let client = RecordingClient::default();
        queue.set_connected(true);

        let outcome = queue.send(&client, "x@g.us", "hello");
        assert_eq!(outcome, SendOutcome::Sent);
        assert_eq!(queue.len(), 0);
        assert_eq!(client.sent().len(), 1);
    }

    #[test]
    fn failed_send_is_requeued() {
        let queue = OutboundQueue::new();
        let client = RecordingClient::failing(1);
        queue.set_connected(true);

        let outcome = queue.send(&client, "x@g.us", "hello");
        assert_eq!(outcome, SendOutcome::Queued);
        assert_eq!(queue.len(), 1);

        queue.flush(&client);
        assert_eq!(queue.len(), 0);
        assert_eq!(client.sent().len(), 1);
    }

    #[test]
    fn flush_is_bounded_under_sustained_failure() {
        let queue = OutboundQueue::new();
        let client = RecordingClient::failing(usize::MAX);
        queue.set_connected(true);

        queue.send(&client, "x@g.us", "a");
        queue.send(&client, "x@g.us", "b");
        assert_eq!(queue.len(), 2);

        // One round through the snapshot length; everything re-enqueues.
        queue.flush(&client);
        assert_eq!(queue.len(), 2);
        assert!(client.sent().is_empty());
    }

    #[test]
    fn flush_on_empty_queue_is_a_no_op() {
        let queue = OutboundQueue::new();
        let client = RecordingClient::default();
        queue.set_connected(true);
        queue.flush(&client);
        assert!(client.sent().is_empty());
    }
}
