//! Batch dispatch orchestration.
//!
//! Invoked by the batch accumulator when a chat's window closes or a hard
//! event forces a flush. Reads the batch from the store, runs every agent
//! mapped to the chat in route order, filters each agent's output through
//! the reply allowlist, and enqueues the survivors outbound. The agent
//! cursor advances once, after all agents have run, so a crash between
//! agents replays the whole batch to everyone.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use tracing::{debug, error, info, warn};

use waclaw_core::routing::{AgentConfig, RoutingConfig};
use waclaw_core::store::{Store, StoreRegistry, StoredMessage};
use waclaw_core::{reply, trigger, xml};

use crate::adapter::{ChatPresence, ChatPresenceMedia, WhatsAppClient};
use crate::batch::FlushFn;
use crate::handler::now_timestamp;
use crate::outbox::OutboundQueue;

/// One dispatch request handed to the agent side.
pub struct DispatchRequest {
    pub prompt: String,
    pub system_prompt: String,
    /// Stable per-agent channel prefix, `wa-{agent_name_lower}`.
    pub channel_prefix: String,
    /// The chat jid; `channel_prefix` + `channel_id` key session resumption.
    pub channel_id: String,
    pub store: Arc<Store>,
    pub data_dir: PathBuf,
    pub model: Option<String>,
}

pub struct DispatchResult {
    pub full_text: String,
    /// Dispatcher-side session id; the bridge never stores it.
    pub session_id: Option<String>,
}

/// The opaque agent collaborator: prompt in, raw output out.
pub trait AgentDispatcher: Send + Sync {
    fn dispatch(&self, request: DispatchRequest)
    -> BoxFuture<'_, anyhow::Result<DispatchResult>>;
}

pub struct DispatchOrchestrator {
    routing: Arc<RoutingConfig>,
    stores: Arc<StoreRegistry>,
    outbox: Arc<OutboundQueue>,
    client: Arc<dyn WhatsAppClient>,
    dispatcher: Arc<dyn AgentDispatcher>,
    /// Data directory for agents without a private one.
    default_data_dir: PathBuf,
}

impl DispatchOrchestrator {
    pub fn new(
        routing: Arc<RoutingConfig>,
        stores: Arc<StoreRegistry>,
        outbox: Arc<OutboundQueue>,
        client: Arc<dyn WhatsAppClient>,
        dispatcher: Arc<dyn AgentDispatcher>,
        default_data_dir: PathBuf,
    ) -> Self {
        Self {
            routing,
            stores,
            outbox,
            client,
            dispatcher,
            default_data_dir,
        }
    }

    /// The flush callback wired into the batch accumulator.
    pub fn flush_fn(self: Arc<Self>) -> FlushFn {
        let orchestrator = self;
        Arc::new(move |chat_jid: String, hard: bool| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move {
                if let Err(err) = orchestrator.flush_chat(&chat_jid, hard).await {
                    error!(chat_jid = chat_jid.as_str(), err = %err, "batch flush failed");
                }
            })
        })
    }

    /// Run one batch for `chat_jid` through every mapped agent.
    pub async fn flush_chat(&self, chat_jid: &str, hard: bool) -> anyhow::Result<()> {
        let agents = self.routing.agents_for(chat_jid);
        let multi = agents.len() > 1;

        let bridge = self.stores.bridge();
        let messages = bridge.messages_since_agent_cursor(chat_jid)?;
        if messages.is_empty() {
            debug!(chat_jid, "empty batch, nothing to dispatch");
            return Ok(());
        }

        let mentioned = if hard {
            let batch_text = messages
                .iter()
                .map(|m| m.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            trigger::find_hard_mentions(&batch_text, &self.routing.all_trigger_names())
        } else {
            Default::default()
        };

        info!(
            chat_jid,
            message_count = messages.len(),
            agent_count = agents.len(),
            hard,
            "dispatching batch"
        );

        for agent in &agents {
            let agent_hard = hard && (mentioned.is_empty() || mentioned.contains(&agent.name));
            if let Err(err) = self
                .run_agent(agent, &agents, chat_jid, &messages, agent_hard, multi)
                .await
            {
                error!(
                    chat_jid,
                    agent = agent.name.as_str(),
                    err = %err,
                    "agent dispatch failed, continuing with remaining agents"
                );
            }
        }

        if let Some(last) = messages.last() {
            bridge.update_agent_cursor(chat_jid, &last.timestamp)?;
        }
        Ok(())
    }

    async fn run_agent(
        &self,
        agent: &AgentConfig,
        all_agents: &[&AgentConfig],
        chat_jid: &str,
        messages: &[StoredMessage],
        agent_hard: bool,
        multi: bool,
    ) -> anyhow::Result<()> {
        let others: Vec<&str> = if multi {
            all_agents
                .iter()
                .filter(|a| a.name != agent.name)
                .map(|a| a.name.as_str())
                .collect()
        } else {
            Vec::new()
        };

        let request = DispatchRequest {
            prompt: build_user_prompt(messages, agent_hard),
            system_prompt: build_system_prompt(&agent.name, chat_jid, agent_hard, &others),
            channel_prefix: format!("wa-{}", agent.name.to_lowercase()),
            channel_id: chat_jid.to_string(),
            store: self.stores.store_for(agent)?,
            data_dir: agent
                .data_dir
                .clone()
                .unwrap_or_else(|| self.default_data_dir.clone()),
            model: agent.model.clone(),
        };

        self.set_presence(chat_jid, ChatPresence::Composing);
        let result = self.dispatcher.dispatch(request).await;
        self.set_presence(chat_jid, ChatPresence::Paused);
        let result = result?;

        match reply::extract_reply(&result.full_text) {
            Some(text) => {
                let outbound = if multi {
                    format!("[{}]: {}", agent.name, text)
                } else {
                    text
                };
                self.outbox.send(self.client.as_ref(), chat_jid, &outbound);
                self.record_sent_reply(chat_jid, &agent.name, &outbound);
                info!(
                    chat_jid,
                    agent = agent.name.as_str(),
                    reply_len = outbound.len(),
                    "agent reply enqueued"
                );
            }
            None => {
                info!(
                    chat_jid,
                    agent = agent.name.as_str(),
                    "agent stayed silent"
                );
            }
        }
        Ok(())
    }

    fn set_presence(&self, chat_jid: &str, state: ChatPresence) {
        if let Err(err) =
            self.client
                .send_chat_presence(chat_jid, state, ChatPresenceMedia::Text)
        {
            debug!(chat_jid, err = %err, "typing indicator failed");
        }
    }

    /// Persist an outbound reply like any other message, advancing the
    /// ingest cursors. It shows up in later batches as conversation context,
    /// the same way the wire echo of the send would.
    fn record_sent_reply(&self, chat_jid: &str, agent_name: &str, text: &str) {
        let bridge = self.stores.bridge();
        let timestamp = now_timestamp(Utc::now());
        let result = bridge
            .append_message(chat_jid, agent_name, text, &timestamp, true)
            .and_then(|()| bridge.update_chat_last_timestamp(chat_jid, &timestamp))
            .and_then(|()| bridge.update_global_cursor(&timestamp));
        if let Err(err) = result {
            warn!(chat_jid, err = %err, "failed to record sent reply");
        }
    }
}

// ---------------------------------------------------------------------------
// Prompt construction
// ---------------------------------------------------------------------------

fn build_system_prompt(
    agent_name: &str,
    chat_jid: &str,
    agent_hard: bool,
    other_agents: &[&str],
) -> String {
    let mut prompt = format!(
        "You are {agent_name}, a participant in the WhatsApp chat {chat_jid}.\n\
         Anything you want delivered to the chat MUST be wrapped in \
         <reply></reply> tags; text outside the tags is never sent.\n\
         Silence is the default: when the conversation does not call for \
         you, produce no <reply> tag at all."
    );
    if agent_hard {
        prompt.push_str(
            "\nYou were addressed directly, so you MUST reply with a <reply> block.",
        );
    }
    if !other_agents.is_empty() {
        prompt.push_str(&format!(
            "\nOther agents share this chat: {}. Messages starting with \
             \"[Name]: \" are from another agent; never reply to them and \
             never address the other agents directly.",
            other_agents.join(", ")
        ));
    }
    prompt
}

fn build_user_prompt(messages: &[StoredMessage], agent_hard: bool) -> String {
    let block = xml::format_xml_messages(messages);
    if agent_hard {
        format!("{block}\n\nYou were mentioned directly: a reply is required.")
    } else {
        block
    }
}
