pub mod config;
pub mod reply;
pub mod routing;
pub mod store;
pub mod trigger;
pub mod xml;

pub use config::{ENV_PREFIX, WhatsAppSettings};
pub use reply::extract_reply;
pub use routing::{AgentConfig, RoutingConfig, load_routing_config};
pub use store::{
    CONVERSATIONS_DDL, MIGRATIONS, PendingDelivery, Store, StoreRegistry, StoredMessage,
};
pub use trigger::{find_hard_mentions, is_hard_mention, is_self_chat};
