//! The WhatsApp-to-agent bridge pipeline.
//!
//! Sits between a WhatsApp client adapter and an agent dispatcher, both
//! supplied by the embedding application as trait objects. Inbound events
//! flow adapter → [`handler`] → store → [`batch`] → [`dispatch`] →
//! [`outbox`] → adapter; [`poller`] carries agent-initiated deliveries the
//! other way, and [`supervisor`] owns the wiring and the connection
//! lifecycle.

pub mod adapter;
pub mod batch;
pub mod dispatch;
pub mod handler;
pub mod outbox;
pub mod poller;
pub mod supervisor;

#[cfg(test)]
mod testutil;

pub use adapter::{ClientEvent, EventSender, InboundMessage, MessageContent, WhatsAppClient};
pub use dispatch::{AgentDispatcher, DispatchRequest, DispatchResult};
pub use supervisor::Supervisor;
