//! Inbound message handling.
//!
//! Runs on the supervisor's event loop for every message event the adapter
//! posts. Persists the message, classifies it, and either arms the chat's
//! batch timer or forces an immediate flush for hard events. The connection
//! must survive anything a malformed event can throw at this path, so every
//! failure here is logged and swallowed.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info, warn};

use waclaw_core::routing::RoutingConfig;
use waclaw_core::store::Store;
use waclaw_core::trigger;

use crate::adapter::InboundMessage;
use crate::batch::BatchAccumulator;

const STATUS_BROADCAST: &str = "status@broadcast";

/// The authenticated account's own jid, set once per connect.
#[derive(Clone, Default)]
pub struct SelfJid(Arc<Mutex<Option<String>>>);

impl SelfJid {
    pub fn set(&self, jid: String) {
        *self.0.lock().unwrap_or_else(|err| err.into_inner()) = Some(jid);
    }

    pub fn get(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(|err| err.into_inner()).clone()
    }
}

/// Millisecond epoch → fixed-width ISO-8601 UTC.
///
/// The width matters: cursor comparisons happen lexicographically in SQL.
/// `None` for timestamps outside the representable range; callers drop the
/// event.
pub fn iso_timestamp(timestamp_ms: i64) -> Option<String> {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(now_timestamp)
}

/// Format an instant the way stored timestamps are formatted.
pub(crate) fn now_timestamp(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

pub struct InboundHandler {
    store: Arc<Store>,
    routing: Arc<RoutingConfig>,
    batch: BatchAccumulator,
    self_jid: SelfJid,
}

impl InboundHandler {
    pub fn new(
        store: Arc<Store>,
        routing: Arc<RoutingConfig>,
        batch: BatchAccumulator,
        self_jid: SelfJid,
    ) -> Self {
        Self {
            store,
            routing,
            batch,
            self_jid,
        }
    }

    pub fn on_message(&self, message: &InboundMessage) {
        if message.chat_jid == STATUS_BROADCAST {
            return;
        }

        let Some(text) = message.content.body() else {
            debug!(
                chat_jid = message.chat_jid.as_str(),
                "no text body, dropping event"
            );
            return;
        };

        let Some(timestamp) = iso_timestamp(message.timestamp_ms) else {
            warn!(
                chat_jid = message.chat_jid.as_str(),
                timestamp_ms = message.timestamp_ms,
                "unrepresentable timestamp, dropping event"
            );
            return;
        };

        let sender = if message.push_name.is_empty() {
            message.sender_jid.as_str()
        } else {
            message.push_name.as_str()
        };

        let persisted = self
            .store
            .append_message(
                &message.chat_jid,
                sender,
                text,
                &timestamp,
                message.is_from_me,
            )
            .and_then(|()| {
                self.store
                    .update_chat_last_timestamp(&message.chat_jid, &timestamp)
            })
            .and_then(|()| self.store.update_global_cursor(&timestamp));
        if let Err(err) = persisted {
            warn!(chat_jid = message.chat_jid.as_str(), err = %err, "failed to persist message, dropping event");
            return;
        }

        if message.is_from_me {
            return;
        }

        let self_chat = self
            .self_jid
            .get()
            .is_some_and(|jid| trigger::is_self_chat(&message.chat_jid, &jid, message.is_group));
        let hard_mention =
            !trigger::find_hard_mentions(text, &self.routing.all_trigger_names()).is_empty();

        if self_chat || hard_mention {
            info!(
                chat_jid = message.chat_jid.as_str(),
                sender,
                self_chat,
                "hard event, flushing now"
            );
            self.batch.flush_now(&message.chat_jid);
        } else {
            self.batch.add(&message.chat_jid);
        }
    }
}
