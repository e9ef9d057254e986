//! Pending-delivery poller.
//!
//! Agents initiate outbound messages by inserting `pending_deliveries` rows
//! into their store; this loop scans every known store on a fixed period,
//! routes each row back to its chat through the conversation name, sends it
//! through the outbound queue, and marks the row terminal. Runs only while
//! connected; the supervisor cancels it on disconnect via the shutdown
//! signal, and an in-progress tick always completes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use waclaw_core::routing::RoutingConfig;
use waclaw_core::store::{PendingDelivery, Store, StoreRegistry};

use crate::adapter::WhatsAppClient;
use crate::outbox::OutboundQueue;

/// Channel tag the bridge consumes from `pending_deliveries`.
pub const DELIVERY_CHANNEL: &str = "wa";

pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct DeliveryPoller {
    routing: Arc<RoutingConfig>,
    stores: Arc<StoreRegistry>,
    outbox: Arc<OutboundQueue>,
    client: Arc<dyn WhatsAppClient>,
    poll_interval: Duration,
}

impl DeliveryPoller {
    pub fn new(
        routing: Arc<RoutingConfig>,
        stores: Arc<StoreRegistry>,
        outbox: Arc<OutboundQueue>,
        client: Arc<dyn WhatsAppClient>,
    ) -> Self {
        Self {
            routing,
            stores,
            outbox,
            client,
            poll_interval: POLL_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run the poll loop. Exits when the shutdown signal fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = self.poll_interval.as_millis(),
            "delivery poller started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("delivery poller shutting down");
                        return;
                    }
                }
            }
            self.poll_once();
        }
    }

    /// One tick: scan every known store. A failing store never prevents the
    /// others from being scanned in the same tick.
    pub fn poll_once(&self) {
        for (label, store) in self.stores.all_stores() {
            let pending = match store.pending_deliveries(DELIVERY_CHANNEL) {
                Ok(pending) => pending,
                Err(err) => {
                    error!(store = label.as_str(), err = %err, "pending delivery scan failed");
                    continue;
                }
            };
            for delivery in pending {
                let id = delivery.id;
                if let Err(err) = self.deliver(&store, delivery) {
                    warn!(store = label.as_str(), id, err = %err, "delivery failed");
                    if let Err(err) = store.mark_failed(id, "send failed") {
                        error!(store = label.as_str(), id, err = %err, "failed to mark delivery failed");
                    }
                }
            }
        }
    }

    fn deliver(&self, store: &Store, delivery: PendingDelivery) -> anyhow::Result<()> {
        let (agent, chat_jid) = match self.routing.parse_conversation(&delivery.conversation) {
            Some((agent, chat_jid)) => (agent, chat_jid),
            None => {
                // Legacy conversation name with no agent segment.
                let chat_jid = delivery
                    .conversation
                    .strip_prefix("wa-")
                    .with_context(|| {
                        format!("unroutable conversation {:?}", delivery.conversation)
                    })?;
                warn!(
                    conversation = delivery.conversation.as_str(),
                    "legacy conversation name, routing to default agent"
                );
                let agent = self
                    .routing
                    .agents
                    .get(&self.routing.default_agent)
                    .context("default agent missing from routing table")?;
                (agent, chat_jid)
            }
        };

        let text = if self.routing.is_multi(chat_jid) {
            format!("[{}]: {}", agent.name, delivery.message)
        } else {
            delivery.message.clone()
        };

        self.outbox.send(self.client.as_ref(), chat_jid, &text);
        store.mark_delivered(delivery.id)?;
        debug!(
            chat_jid,
            agent = agent.name.as_str(),
            id = delivery.id,
            "pending delivery sent"
        );
        Ok(())
    }
}
