//! Smoke tests for the full bridge pipeline.
//!
//! Drive a real `Supervisor` with a scripted client adapter and a scripted
//! dispatcher: adapter events go in, outbound sends come out, and the store
//! on disk carries the cursors. No WhatsApp, no agent runtime.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::{sleep, timeout};

use waclaw_core::WhatsAppSettings;
use waclaw_core::routing::{AgentConfig, RoutingConfig};
use waclaw_core::store::Store;
use waclawd::adapter::{
    ChatPresence, ChatPresenceMedia, ClientEvent, EventSender, InboundMessage, MessageContent,
    WhatsAppClient,
};
use waclawd::dispatch::{AgentDispatcher, DispatchRequest, DispatchResult};
use waclawd::supervisor::Supervisor;

/// One step of a scripted connection.
enum Step {
    Event(ClientEvent),
    Sleep(Duration),
}

/// Adapter that replays a scripted event sequence from its "wire thread".
#[derive(Default)]
struct ScriptedClient {
    script: Mutex<Vec<Step>>,
    sent: Mutex<Vec<(String, String)>>,
}

impl ScriptedClient {
    fn scripted(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

impl WhatsAppClient for ScriptedClient {
    fn connect(&self, events: EventSender) -> anyhow::Result<()> {
        let steps = std::mem::take(&mut *self.script.lock().unwrap());
        for step in steps {
            match step {
                Step::Event(event) => {
                    let _ = events.send(event);
                }
                Step::Sleep(duration) => std::thread::sleep(duration),
            }
        }
        Ok(())
    }

    fn disconnect(&self) {}

    fn send_message(&self, to_jid: &str, text: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to_jid.to_string(), text.to_string()));
        Ok(())
    }

    fn send_chat_presence(
        &self,
        _to_jid: &str,
        _state: ChatPresence,
        _media: ChatPresenceMedia,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Dispatcher that answers each channel prefix with a fixed raw output.
#[derive(Default)]
struct ScriptedDispatcher {
    replies: HashMap<String, String>,
}

impl ScriptedDispatcher {
    fn replying(replies: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            replies: replies
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
    }
}

impl AgentDispatcher for ScriptedDispatcher {
    fn dispatch(
        &self,
        request: DispatchRequest,
    ) -> BoxFuture<'_, anyhow::Result<DispatchResult>> {
        Box::pin(async move {
            Ok(DispatchResult {
                full_text: self
                    .replies
                    .get(&request.channel_prefix)
                    .cloned()
                    .unwrap_or_default(),
                session_id: None,
            })
        })
    }
}

fn settings(dir: &tempfile::TempDir, window_seconds: u64) -> WhatsAppSettings {
    WhatsAppSettings {
        auth_dir: dir.path().join("auth"),
        trigger_name: "Andy".to_string(),
        session_db: dir.path().join("session.db"),
        batch_window_seconds: window_seconds,
        agent_routes: None,
    }
}

fn connected(self_jid: &str) -> Step {
    Step::Event(ClientEvent::Connected {
        self_jid: self_jid.to_string(),
    })
}

fn inbound(chat_jid: &str, text: &str, timestamp_ms: i64) -> Step {
    Step::Event(ClientEvent::Message(InboundMessage {
        chat_jid: chat_jid.to_string(),
        sender_jid: "111@s.whatsapp.net".to_string(),
        push_name: "Alice".to_string(),
        is_from_me: false,
        is_group: chat_jid.ends_with("@g.us"),
        timestamp_ms,
        content: MessageContent::text(text),
    }))
}

async fn wait_for<F: Fn() -> bool>(cond: F) {
    timeout(Duration::from_secs(10), async {
        while !cond() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn hard_mention_round_trips_to_outbound() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::scripted(vec![
        connected("555@s.whatsapp.net"),
        inbound("123@g.us", "@Andy how do I fix this?", 1_704_110_400_000),
    ]);
    let dispatcher = ScriptedDispatcher::replying(&[(
        "wa-andy",
        "let me think\n<reply>restart it</reply>\ndone thinking",
    )]);

    let supervisor = Supervisor::new(
        settings(&dir, 300),
        RoutingConfig::single_agent("Andy"),
        client.clone(),
        dispatcher,
    )
    .unwrap();
    supervisor.run().await.unwrap();

    wait_for(|| !client.sent().is_empty()).await;
    assert_eq!(
        client.sent(),
        vec![("123@g.us".to_string(), "restart it".to_string())]
    );

    // Cursor advanced to the flushed message on disk.
    sleep(Duration::from_millis(200)).await;
    let store = Store::open(&dir.path().join("session.db")).unwrap();
    let (_, agent_cursor) = store.chat_cursors("123@g.us").unwrap().unwrap();
    assert_eq!(agent_cursor.as_deref(), Some("2024-01-01T12:00:00.000Z"));
}

#[tokio::test]
async fn self_chat_flushes_without_mention() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::scripted(vec![
        connected("555@s.whatsapp.net"),
        inbound("555@s.whatsapp.net", "remember the milk", 1_704_110_400_000),
    ]);
    let dispatcher =
        ScriptedDispatcher::replying(&[("wa-andy", "<reply>noted: milk</reply>")]);

    let supervisor = Supervisor::new(
        settings(&dir, 300),
        RoutingConfig::single_agent("Andy"),
        client.clone(),
        dispatcher,
    )
    .unwrap();
    supervisor.run().await.unwrap();

    wait_for(|| !client.sent().is_empty()).await;
    assert_eq!(
        client.sent(),
        vec![(
            "555@s.whatsapp.net".to_string(),
            "noted: milk".to_string()
        )]
    );
}

#[tokio::test]
async fn ambient_batch_flushes_after_window() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::scripted(vec![
        connected("555@s.whatsapp.net"),
        inbound("123@g.us", "no mention here", 1_704_110_400_000),
        inbound("123@g.us", "still nothing", 1_704_110_401_000),
    ]);
    let dispatcher = ScriptedDispatcher::replying(&[("wa-andy", "<reply>ambient</reply>")]);

    let supervisor = Supervisor::new(
        settings(&dir, 1),
        RoutingConfig::single_agent("Andy"),
        client.clone(),
        dispatcher,
    )
    .unwrap();
    supervisor.run().await.unwrap();

    // Both messages ride one window; one flush, one send.
    wait_for(|| !client.sent().is_empty()).await;
    sleep(Duration::from_millis(200)).await;
    assert_eq!(
        client.sent(),
        vec![("123@g.us".to_string(), "ambient".to_string())]
    );

    let store = Store::open(&dir.path().join("session.db")).unwrap();
    let (_, agent_cursor) = store.chat_cursors("123@g.us").unwrap().unwrap();
    assert_eq!(agent_cursor.as_deref(), Some("2024-01-01T12:00:01.000Z"));
}

#[tokio::test]
async fn multi_agent_chat_fans_out_in_route_order() {
    let dir = tempfile::tempdir().unwrap();

    let mut agents = BTreeMap::new();
    agents.insert("Ressu".to_string(), AgentConfig::named("Ressu"));
    agents.insert("Tyko".to_string(), AgentConfig::named("Tyko"));
    let mut routes = BTreeMap::new();
    routes.insert(
        "g@g.us".to_string(),
        vec!["Ressu".to_string(), "Tyko".to_string()],
    );
    let routing = RoutingConfig {
        default_agent: "Ressu".to_string(),
        agents,
        routes,
    };

    let client = ScriptedClient::scripted(vec![
        connected("555@s.whatsapp.net"),
        inbound("g@g.us", "@Ressu @Tyko hello", 1_704_110_400_000),
    ]);
    let dispatcher = ScriptedDispatcher::replying(&[
        ("wa-ressu", "<reply>Hi</reply>"),
        ("wa-tyko", "<reply>Hello</reply>"),
    ]);

    let supervisor = Supervisor::new(settings(&dir, 300), routing, client.clone(), dispatcher)
        .unwrap();
    supervisor.run().await.unwrap();

    wait_for(|| client.sent().len() >= 2).await;
    assert_eq!(
        client.sent(),
        vec![
            ("g@g.us".to_string(), "[Ressu]: Hi".to_string()),
            ("g@g.us".to_string(), "[Tyko]: Hello".to_string()),
        ]
    );
}

#[tokio::test]
async fn sends_while_disconnected_flush_on_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::scripted(vec![
        connected("555@s.whatsapp.net"),
        Step::Event(ClientEvent::Disconnected),
        // Hard mention while offline: the reply must queue, not drop.
        inbound("123@g.us", "@Andy are you there?", 1_704_110_400_000),
        Step::Sleep(Duration::from_millis(500)),
        connected("555@s.whatsapp.net"),
        Step::Sleep(Duration::from_millis(100)),
    ]);
    let dispatcher = ScriptedDispatcher::replying(&[("wa-andy", "<reply>back now</reply>")]);

    let supervisor = Supervisor::new(
        settings(&dir, 300),
        RoutingConfig::single_agent("Andy"),
        client.clone(),
        dispatcher,
    )
    .unwrap();
    let outbox = supervisor.outbox();
    supervisor.run().await.unwrap();

    // The reconnect flush usually drains the queue before run() returns; if
    // the dispatch lost that race, drain it here.
    timeout(Duration::from_secs(10), async {
        while client.sent().is_empty() {
            outbox.flush(client.as_ref());
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("queued reply never flushed");

    assert_eq!(
        client.sent(),
        vec![("123@g.us".to_string(), "back now".to_string())]
    );
}
