//! Shared test doubles.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::adapter::{ChatPresence, ChatPresenceMedia, EventSender, WhatsAppClient};

/// Client that records sends and optionally fails the first `fail_first`
/// of them.
#[derive(Default)]
pub(crate) struct RecordingClient {
    pub sent: Mutex<Vec<(String, String)>>,
    pub presence: Mutex<Vec<(String, ChatPresence)>>,
    attempts: AtomicUsize,
    fail_first: usize,
}

impl RecordingClient {
    pub fn failing(fail_first: usize) -> Self {
        Self {
            fail_first,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

impl WhatsAppClient for RecordingClient {
    fn connect(&self, _events: EventSender) -> anyhow::Result<()> {
        Ok(())
    }

    fn disconnect(&self) {}

    fn send_message(&self, to_jid: &str, text: &str) -> anyhow::Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            anyhow::bail!("wire closed");
        }
        self.sent
            .lock()
            .unwrap()
            .push((to_jid.to_string(), text.to_string()));
        Ok(())
    }

    fn send_chat_presence(
        &self,
        to_jid: &str,
        state: ChatPresence,
        _media: ChatPresenceMedia,
    ) -> anyhow::Result<()> {
        self.presence
            .lock()
            .unwrap()
            .push((to_jid.to_string(), state));
        Ok(())
    }
}
