//! Multi-agent chat routing.
//!
//! Maps WhatsApp chat jids to one or more agent personalities. Each agent has
//! a trigger name, an optional model override, and an optional private data
//! directory. Chats not listed in the routes table, and all direct messages,
//! use the default agent.
//!
//! Config file format (JSON):
//!
//! ```json
//! {
//!   "default_agent": "Ressu",
//!   "agents": {
//!     "Ressu": {},
//!     "Tyko": { "model": "claude-opus-4-6" }
//!   },
//!   "routes": {
//!     "120363@g.us": ["Ressu"],
//!     "120365@g.us": ["Ressu", "Tyko"]
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One agent personality.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AgentConfig {
    /// Case-sensitive trigger name.
    pub name: String,
    /// Model override passed through to the dispatcher.
    pub model: Option<String>,
    /// Private data directory; agents without one share the bridge store.
    pub data_dir: Option<PathBuf>,
}

impl AgentConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: None,
            data_dir: None,
        }
    }
}

/// The routing table, immutable for the process lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingConfig {
    pub default_agent: String,
    pub agents: BTreeMap<String, AgentConfig>,
    pub routes: BTreeMap<String, Vec<String>>,
}

impl RoutingConfig {
    /// Single-agent table used when no routes file is configured.
    pub fn single_agent(trigger_name: &str) -> Self {
        let mut agents = BTreeMap::new();
        agents.insert(
            trigger_name.to_string(),
            AgentConfig::named(trigger_name),
        );
        Self {
            default_agent: trigger_name.to_string(),
            agents,
            routes: BTreeMap::new(),
        }
    }

    /// The agents mapped to a chat, in route order. Unrouted chats get the
    /// default agent.
    pub fn agents_for(&self, chat_jid: &str) -> Vec<&AgentConfig> {
        match self.routes.get(chat_jid) {
            Some(names) => names.iter().filter_map(|n| self.agents.get(n)).collect(),
            None => self.agents.get(&self.default_agent).into_iter().collect(),
        }
    }

    /// True if the chat has two or more agents mapped.
    pub fn is_multi(&self, chat_jid: &str) -> bool {
        self.routes
            .get(chat_jid)
            .is_some_and(|names| names.len() >= 2)
    }

    /// All agent names, for hard-mention detection.
    pub fn all_trigger_names(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    /// Conversation name for an agent + chat pair: `wa-{name_lower}-{jid}`.
    pub fn conversation_name(&self, agent: &AgentConfig, chat_jid: &str) -> String {
        format!("wa-{}-{}", agent.name.to_lowercase(), chat_jid)
    }

    /// Parse a conversation name back into `(agent, chat_jid)`.
    ///
    /// `None` when no known agent name prefix matches.
    pub fn parse_conversation<'a>(
        &self,
        conversation: &'a str,
    ) -> Option<(&AgentConfig, &'a str)> {
        for agent in self.agents.values() {
            let prefix = format!("wa-{}-", agent.name.to_lowercase());
            if let Some(chat_jid) = conversation.strip_prefix(&prefix) {
                return Some((agent, chat_jid));
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// File loading
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct RoutesFile {
    default_agent: Option<String>,
    #[serde(default)]
    agents: BTreeMap<String, AgentEntry>,
    #[serde(default)]
    routes: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct AgentEntry {
    model: Option<String>,
    data_dir: Option<PathBuf>,
}

/// Load the routing table from a JSON file, or fall back to a single-agent
/// table named after `default_trigger` when no file is configured or the
/// path does not exist.
pub fn load_routing_config(
    path: Option<&Path>,
    default_trigger: &str,
) -> anyhow::Result<RoutingConfig> {
    let Some(path) = path.filter(|p| p.exists()) else {
        return Ok(RoutingConfig::single_agent(default_trigger));
    };

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read routes file: {}", path.display()))?;
    let parsed: RoutesFile = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse routes file: {}", path.display()))?;

    let mut agents: BTreeMap<String, AgentConfig> = parsed
        .agents
        .into_iter()
        .map(|(name, entry)| {
            let agent = AgentConfig {
                name: name.clone(),
                model: entry.model,
                data_dir: entry.data_dir,
            };
            (name, agent)
        })
        .collect();

    let default_agent = parsed
        .default_agent
        .unwrap_or_else(|| default_trigger.to_string());
    agents
        .entry(default_agent.clone())
        .or_insert_with(|| AgentConfig::named(&default_agent));

    let mut routes = BTreeMap::new();
    for (chat_jid, names) in parsed.routes {
        let valid: Vec<String> = names
            .into_iter()
            .filter(|name| {
                let known = agents.contains_key(name);
                if !known {
                    warn!(
                        chat_jid = chat_jid.as_str(),
                        agent = name.as_str(),
                        "route references unknown agent, skipping"
                    );
                }
                known
            })
            .collect();
        if !valid.is_empty() {
            routes.insert(chat_jid, valid);
        }
    }

    info!(
        agents = agents.len(),
        routes = routes.len(),
        default_agent = default_agent.as_str(),
        "loaded routing config"
    );

    Ok(RoutingConfig {
        default_agent,
        agents,
        routes,
    })
}
