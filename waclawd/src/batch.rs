//! Per-chat batch accumulator.
//!
//! The accumulator only tracks timers, never message content; the store is
//! the source of truth for what a batch contains. `add` arms a debounce
//! timer per chat (the first message in a batch sets the deadline; later
//! ones do not push it out), `flush_now` preempts the timer for hard events,
//! and a per-chat single-flight lock guarantees at most one flush callback
//! runs per chat at any instant. A flush request landing while a flush is in
//! progress collapses into the pending-reflush bit, which converts to one
//! fresh timer when the running flush finishes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::AbortHandle;
use tracing::debug;

/// Flush callback: `(chat_jid, hard)`.
pub type FlushFn = Arc<dyn Fn(String, bool) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
struct ChatState {
    timer: Option<AbortHandle>,
    flight: Arc<tokio::sync::Mutex<()>>,
    pending_reflush: bool,
}

#[derive(Clone)]
pub struct BatchAccumulator {
    chats: Arc<Mutex<HashMap<String, ChatState>>>,
    window: Duration,
    flush: FlushFn,
}

impl BatchAccumulator {
    pub fn new(window: Duration, flush: FlushFn) -> Self {
        Self {
            chats: Arc::new(Mutex::new(HashMap::new())),
            window,
            flush,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ChatState>> {
        self.chats.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Schedule a flush for `chat_jid` after the debounce window.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add(&self, chat_jid: &str) {
        let mut chats = self.lock();
        let state = chats.entry(chat_jid.to_string()).or_default();

        if state.flight.try_lock().is_err() {
            state.pending_reflush = true;
            debug!(chat_jid, "flush in flight, marked pending reflush");
            return;
        }
        if state.timer.is_none() {
            state.timer = Some(self.spawn_timer(chat_jid.to_string()));
            debug!(
                chat_jid,
                window_secs = self.window.as_secs_f64(),
                "batch timer armed"
            );
        }
    }

    /// Force an immediate flush with `hard = true`, cancelling any pending
    /// timer. A hard flush arriving while a flush is already running
    /// collapses into the pending-reflush bit.
    pub fn flush_now(&self, chat_jid: &str) {
        {
            let mut chats = self.lock();
            let state = chats.entry(chat_jid.to_string()).or_default();
            if let Some(timer) = state.timer.take() {
                timer.abort();
                debug!(chat_jid, "batch timer cancelled by hard flush");
            }
            if state.flight.try_lock().is_err() {
                state.pending_reflush = true;
                debug!(chat_jid, "flush in flight, hard flush marked pending");
                return;
            }
        }
        let acc = self.clone();
        let chat_jid = chat_jid.to_string();
        tokio::spawn(async move {
            acc.do_flush(chat_jid, true).await;
        });
    }

    fn spawn_timer(&self, chat_jid: String) -> AbortHandle {
        let acc = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(acc.window).await;
            {
                let mut chats = acc.lock();
                if let Some(state) = chats.get_mut(&chat_jid) {
                    state.timer = None;
                }
            }
            acc.do_flush(chat_jid, false).await;
        })
        .abort_handle()
    }

    async fn do_flush(&self, chat_jid: String, hard: bool) {
        let flight = {
            let mut chats = self.lock();
            chats.entry(chat_jid.clone()).or_default().flight.clone()
        };
        {
            let _guard = flight.lock().await;
            (self.flush)(chat_jid.clone(), hard).await;
        }

        let mut chats = self.lock();
        if let Some(state) = chats.get_mut(&chat_jid) {
            if state.pending_reflush {
                state.pending_reflush = false;
                if state.timer.is_none() {
                    state.timer = Some(self.spawn_timer(chat_jid.clone()));
                    debug!(chat_jid = chat_jid.as_str(), "reflush timer armed");
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn has_timer(&self, chat_jid: &str) -> bool {
        self.lock()
            .get(chat_jid)
            .is_some_and(|state| state.timer.is_some())
    }

    #[cfg(test)]
    pub(crate) fn has_pending_reflush(&self, chat_jid: &str) -> bool {
        self.lock()
            .get(chat_jid)
            .is_some_and(|state| state.pending_reflush)
    }
}
