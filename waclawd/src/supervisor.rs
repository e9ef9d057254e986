//! Connection lifecycle supervision.
//!
//! Owns the wiring between the client adapter and the pipeline: a single
//! event loop consumes the adapter's posted events, so everything the
//! adapter reports is processed in order, off the adapter's own threads.
//! Connection transitions drive the outbound queue's connected flag, the
//! reconnect flush, and the delivery poller's lifetime.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use waclaw_core::config::WhatsAppSettings;
use waclaw_core::routing::RoutingConfig;
use waclaw_core::store::{Store, StoreRegistry};

use crate::adapter::{ClientEvent, EventReceiver, WhatsAppClient};
use crate::batch::BatchAccumulator;
use crate::dispatch::{AgentDispatcher, DispatchOrchestrator};
use crate::handler::{InboundHandler, SelfJid};
use crate::outbox::OutboundQueue;
use crate::poller::DeliveryPoller;

pub struct Supervisor {
    settings: WhatsAppSettings,
    routing: Arc<RoutingConfig>,
    stores: Arc<StoreRegistry>,
    outbox: Arc<OutboundQueue>,
    client: Arc<dyn WhatsAppClient>,
    dispatcher: Arc<dyn AgentDispatcher>,
}

impl Supervisor {
    /// Open the bridge store and assemble the pipeline around `client` and
    /// `dispatcher`.
    pub fn new(
        settings: WhatsAppSettings,
        routing: RoutingConfig,
        client: Arc<dyn WhatsAppClient>,
        dispatcher: Arc<dyn AgentDispatcher>,
    ) -> anyhow::Result<Self> {
        let bridge = Arc::new(Store::open(&settings.session_db)?);
        Ok(Self {
            settings,
            routing: Arc::new(routing),
            stores: Arc::new(StoreRegistry::new(bridge)),
            outbox: Arc::new(OutboundQueue::new()),
            client,
            dispatcher,
        })
    }

    pub fn outbox(&self) -> Arc<OutboundQueue> {
        self.outbox.clone()
    }

    pub fn stores(&self) -> Arc<StoreRegistry> {
        self.stores.clone()
    }

    /// Run the bridge: spawn the event loop and block on the adapter's
    /// connect call. Returns when the adapter's session ends.
    pub async fn run(&self) -> anyhow::Result<()> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let data_dir = self
            .settings
            .session_db
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::path::PathBuf::from("."));
        let orchestrator = Arc::new(DispatchOrchestrator::new(
            self.routing.clone(),
            self.stores.clone(),
            self.outbox.clone(),
            self.client.clone(),
            self.dispatcher.clone(),
            data_dir,
        ));
        let accumulator = BatchAccumulator::new(
            std::time::Duration::from_secs(self.settings.batch_window_seconds),
            orchestrator.flush_fn(),
        );
        let self_jid = SelfJid::default();
        let handler = InboundHandler::new(
            self.stores.bridge(),
            self.routing.clone(),
            accumulator,
            self_jid.clone(),
        );

        let event_loop = tokio::spawn(run_event_loop(
            events_rx,
            handler,
            self_jid,
            self.routing.clone(),
            self.stores.clone(),
            self.outbox.clone(),
            self.client.clone(),
        ));

        info!("starting WhatsApp connection");
        let client = self.client.clone();
        let connect = tokio::task::spawn_blocking(move || client.connect(events_tx));
        let result = connect.await.context("adapter connect task panicked")?;

        // The sender is gone; the loop drains what's left and exits.
        event_loop.await.context("event loop task panicked")?;
        result
    }
}

/// Consume adapter events until every sender is dropped.
async fn run_event_loop(
    mut events: EventReceiver,
    handler: InboundHandler,
    self_jid: SelfJid,
    routing: Arc<RoutingConfig>,
    stores: Arc<StoreRegistry>,
    outbox: Arc<OutboundQueue>,
    client: Arc<dyn WhatsAppClient>,
) {
    let mut poller_shutdown: Option<watch::Sender<bool>> = None;

    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::Qr => {
                warn!("QR code received, run the WhatsApp auth command to authenticate");
            }
            ClientEvent::Connected { self_jid: jid } => {
                outbox.set_connected(true);
                info!(self_jid = jid.as_str(), "connected to WhatsApp");
                self_jid.set(jid);
                outbox.flush(client.as_ref());
                if poller_shutdown.is_none() {
                    let (tx, rx) = watch::channel(false);
                    let poller = DeliveryPoller::new(
                        routing.clone(),
                        stores.clone(),
                        outbox.clone(),
                        client.clone(),
                    );
                    tokio::spawn(poller.run(rx));
                    poller_shutdown = Some(tx);
                }
            }
            ClientEvent::Disconnected => {
                outbox.set_connected(false);
                if let Some(shutdown) = poller_shutdown.take() {
                    let _ = shutdown.send(true);
                }
                info!(queued_messages = outbox.len(), "disconnected from WhatsApp");
            }
            ClientEvent::Message(message) => {
                handler.on_message(&message);
            }
        }
    }

    if let Some(shutdown) = poller_shutdown.take() {
        let _ = shutdown.send(true);
    }
}
