//! SQLite-backed message store.
//!
//! Append-only message log plus the dual cursor bookkeeping that drives
//! batching: `wa_chats.last_timestamp` tracks the highest ingested message
//! per chat, `wa_chats.last_agent_timestamp` the highest message already
//! delivered to an agent, and `wa_config('last_timestamp')` the global
//! ingest high-water mark. Timestamps are fixed-width ISO-8601 UTC strings,
//! so lexicographic comparison in SQL is chronological comparison.
//!
//! The `pending_deliveries` table is written by the agent side and only
//! consumed here; the bridge flips rows to a terminal status after a send
//! attempt.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use rusqlite::{Connection, OptionalExtension, params};

use crate::routing::AgentConfig;

/// Bridge-owned tables, applied idempotently on open.
pub const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS wa_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        chat_jid TEXT NOT NULL,
        sender TEXT,
        text TEXT,
        timestamp TEXT NOT NULL,
        is_from_me INTEGER DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS wa_chats (
        jid TEXT PRIMARY KEY,
        name TEXT,
        last_timestamp TEXT,
        last_agent_timestamp TEXT
    )",
    "CREATE TABLE IF NOT EXISTS wa_config (
        key TEXT PRIMARY KEY,
        value TEXT
    )",
    "CREATE TABLE IF NOT EXISTS pending_deliveries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        channel TEXT NOT NULL,
        conversation TEXT NOT NULL,
        message TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        error TEXT
    )",
];

/// Dispatcher-owned session table, emitted with the schema for reference.
/// The bridge never writes `session_id`.
pub const CONVERSATIONS_DDL: &str = "CREATE TABLE IF NOT EXISTS conversations (
    name TEXT PRIMARY KEY,
    session_id TEXT,
    cwd TEXT,
    created_at TEXT NOT NULL
)";

/// One row of a message batch, ordered by timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub sender: String,
    pub timestamp: String,
    pub text: String,
}

/// An agent-initiated outbound message awaiting delivery.
#[derive(Debug, Clone)]
pub struct PendingDelivery {
    pub id: i64,
    pub conversation: String,
    pub message: String,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if needed) a store at `path` with WAL journaling.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open store: {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL journaling")?;
        Self::with_connection(conn)
    }

    /// In-memory store, for tests.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory store")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> anyhow::Result<Self> {
        for ddl in MIGRATIONS {
            conn.execute_batch(ddl).context("failed to apply schema")?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Append one message to the log.
    pub fn append_message(
        &self,
        chat_jid: &str,
        sender: &str,
        text: &str,
        timestamp: &str,
        is_from_me: bool,
    ) -> anyhow::Result<()> {
        self.conn()
            .execute(
                "INSERT INTO wa_messages (chat_jid, sender, text, timestamp, is_from_me)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![chat_jid, sender, text, timestamp, is_from_me as i64],
            )
            .context("failed to append message")?;
        Ok(())
    }

    /// Upsert the per-chat ingest cursor.
    pub fn update_chat_last_timestamp(&self, chat_jid: &str, timestamp: &str) -> anyhow::Result<()> {
        self.conn()
            .execute(
                "INSERT INTO wa_chats (jid, last_timestamp) VALUES (?1, ?2)
                 ON CONFLICT(jid) DO UPDATE SET last_timestamp = excluded.last_timestamp",
                params![chat_jid, timestamp],
            )
            .context("failed to update chat timestamp")?;
        Ok(())
    }

    /// Upsert the global ingest cursor.
    pub fn update_global_cursor(&self, timestamp: &str) -> anyhow::Result<()> {
        self.conn()
            .execute(
                "INSERT INTO wa_config (key, value) VALUES ('last_timestamp', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![timestamp],
            )
            .context("failed to update global cursor")?;
        Ok(())
    }

    /// Upsert the per-chat agent cursor. Called only after a dispatch pass
    /// completes, so a crash mid-dispatch replays the batch.
    pub fn update_agent_cursor(&self, chat_jid: &str, timestamp: &str) -> anyhow::Result<()> {
        self.conn()
            .execute(
                "INSERT INTO wa_chats (jid, last_agent_timestamp) VALUES (?1, ?2)
                 ON CONFLICT(jid) DO UPDATE SET
                     last_agent_timestamp = excluded.last_agent_timestamp",
                params![chat_jid, timestamp],
            )
            .context("failed to update agent cursor")?;
        Ok(())
    }

    /// Messages newer than the chat's agent cursor, ascending by timestamp.
    pub fn messages_since_agent_cursor(
        &self,
        chat_jid: &str,
    ) -> anyhow::Result<Vec<StoredMessage>> {
        let conn = self.conn();
        let since: Option<String> = conn
            .query_row(
                "SELECT last_agent_timestamp FROM wa_chats WHERE jid = ?1",
                params![chat_jid],
                |row| row.get(0),
            )
            .optional()
            .context("failed to read agent cursor")?
            .flatten();
        let since = since.unwrap_or_default();

        let mut stmt = conn
            .prepare(
                "SELECT sender, timestamp, text FROM wa_messages
                 WHERE chat_jid = ?1 AND timestamp > ?2
                 ORDER BY timestamp",
            )
            .context("failed to prepare batch query")?;
        let rows = stmt
            .query_map(params![chat_jid, since], |row| {
                Ok(StoredMessage {
                    sender: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    timestamp: row.get(1)?,
                    text: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                })
            })
            .context("failed to query batch")?
            .collect::<Result<Vec<_>, _>>()
            .context("failed to read batch rows")?;
        Ok(rows)
    }

    /// The chat's ingest and agent cursors, if the chat row exists.
    pub fn chat_cursors(
        &self,
        chat_jid: &str,
    ) -> anyhow::Result<Option<(Option<String>, Option<String>)>> {
        self.conn()
            .query_row(
                "SELECT last_timestamp, last_agent_timestamp FROM wa_chats WHERE jid = ?1",
                params![chat_jid],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("failed to read chat cursors")
    }

    /// Pending agent-initiated deliveries for a channel, FIFO by id.
    pub fn pending_deliveries(&self, channel: &str) -> anyhow::Result<Vec<PendingDelivery>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, conversation, message FROM pending_deliveries
                 WHERE channel = ?1 AND status = 'pending'
                 ORDER BY id",
            )
            .context("failed to prepare pending query")?;
        let rows = stmt
            .query_map(params![channel], |row| {
                Ok(PendingDelivery {
                    id: row.get(0)?,
                    conversation: row.get(1)?,
                    message: row.get(2)?,
                })
            })
            .context("failed to query pending deliveries")?
            .collect::<Result<Vec<_>, _>>()
            .context("failed to read pending rows")?;
        Ok(rows)
    }

    pub fn mark_delivered(&self, id: i64) -> anyhow::Result<()> {
        self.conn()
            .execute(
                "UPDATE pending_deliveries SET status = 'delivered' WHERE id = ?1",
                params![id],
            )
            .context("failed to mark delivery delivered")?;
        Ok(())
    }

    pub fn mark_failed(&self, id: i64, error: &str) -> anyhow::Result<()> {
        self.conn()
            .execute(
                "UPDATE pending_deliveries SET status = 'failed', error = ?2 WHERE id = ?1",
                params![id, error],
            )
            .context("failed to mark delivery failed")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-agent store registry
// ---------------------------------------------------------------------------

/// Lazily opened per-agent stores, keyed by agent name.
///
/// The bridge store is always present; agents with a private `data_dir` get
/// their own `session.db` inside it on first reference, and agents without
/// one share the bridge store.
pub struct StoreRegistry {
    bridge: Arc<Store>,
    agents: Mutex<HashMap<String, Arc<Store>>>,
}

impl StoreRegistry {
    pub fn new(bridge: Arc<Store>) -> Self {
        Self {
            bridge,
            agents: Mutex::new(HashMap::new()),
        }
    }

    pub fn bridge(&self) -> Arc<Store> {
        self.bridge.clone()
    }

    /// The store backing dispatches for `agent`.
    pub fn store_for(&self, agent: &AgentConfig) -> anyhow::Result<Arc<Store>> {
        let Some(data_dir) = agent.data_dir.as_ref() else {
            return Ok(self.bridge.clone());
        };
        let mut agents = self
            .agents
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        if let Some(store) = agents.get(&agent.name) {
            return Ok(store.clone());
        }
        let store = Arc::new(Store::open(&data_dir.join("session.db"))?);
        agents.insert(agent.name.clone(), store.clone());
        Ok(store)
    }

    /// Every known store: the bridge plus all lazily opened agent stores.
    /// Labels are the agent names, `"bridge"` for the bridge store.
    pub fn all_stores(&self) -> Vec<(String, Arc<Store>)> {
        let mut stores = vec![("bridge".to_string(), self.bridge.clone())];
        let agents = self
            .agents
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        for (name, store) in agents.iter() {
            stores.push((name.clone(), store.clone()));
        }
        stores
    }
}
