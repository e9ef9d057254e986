//! WhatsApp client adapter interface.
//!
//! The concrete client library lives outside this crate. It calls back on
//! its own threads, so the contract is: callbacks post [`ClientEvent`]s
//! through the [`EventSender`] and return immediately; no bridge logic runs
//! on the client's threads. The supervisor's event loop is the single
//! consumer, which makes channel order the canonical inbound order.

use tokio::sync::mpsc;

/// Thread-safe handle the adapter uses to post events into the bridge.
pub type EventSender = mpsc::UnboundedSender<ClientEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ClientEvent>;

/// Connection lifecycle and message events, in the order the client
/// library reported them.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A QR code is being shown; authentication must happen out of band.
    Qr,
    Connected {
        /// The authenticated account's own jid.
        self_jid: String,
    },
    Disconnected,
    Message(InboundMessage),
}

/// One inbound message event from the client library.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat_jid: String,
    pub sender_jid: String,
    pub push_name: String,
    pub is_from_me: bool,
    pub is_group: bool,
    /// Millisecond epoch timestamp as reported by the wire.
    pub timestamp_ms: i64,
    pub content: MessageContent,
}

/// The text-bearing fields of a wire message, mirroring the client
/// library's message union.
#[derive(Debug, Clone, Default)]
pub struct MessageContent {
    pub conversation: Option<String>,
    pub extended_text: Option<String>,
    pub image_caption: Option<String>,
    pub video_caption: Option<String>,
    pub document_caption: Option<String>,
}

impl MessageContent {
    /// Plain-text conversation message.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            conversation: Some(body.into()),
            ..Self::default()
        }
    }

    /// The message's text body: plain text first, then the extended text
    /// body, then image, video, and document captions. `None` when no field
    /// yields a non-empty string.
    pub fn body(&self) -> Option<&str> {
        [
            &self.conversation,
            &self.extended_text,
            &self.image_caption,
            &self.video_caption,
            &self.document_caption,
        ]
        .into_iter()
        .filter_map(|field| field.as_deref())
        .find(|body| !body.is_empty())
    }
}

/// Typing-indicator state for `send_chat_presence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPresence {
    Composing,
    Paused,
}

/// Which composer the typing indicator shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPresenceMedia {
    Text,
    Audio,
}

/// The client adapter surface the bridge drives.
///
/// `connect` blocks until the session ends (disconnect or logout) and is
/// run on a blocking thread by the supervisor. `send_message` and
/// `send_chat_presence` must be callable from any thread.
pub trait WhatsAppClient: Send + Sync {
    fn connect(&self, events: EventSender) -> anyhow::Result<()>;

    fn disconnect(&self);

    fn send_message(&self, to_jid: &str, text: &str) -> anyhow::Result<()>;

    /// Best-effort typing indicator; callers swallow errors.
    fn send_chat_presence(
        &self,
        to_jid: &str,
        state: ChatPresence,
        media: ChatPresenceMedia,
    ) -> anyhow::Result<()>;
}
