//! wa-core: shared building blocks for the WhatsApp auto-reply gateway
//!
//! Tenant and chat identifiers, the reply/prompt data store, lifecycle
//! event notification and configuration loading.

pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod repository;

pub use config::{ApiConfig, BridgeConfig, Config, DatabaseConfig, EventsConfig, SessionConfig};
pub use error::{Error, Result};
pub use events::{EventNotifier, LifecycleEvent};
pub use models::{ChatId, ConversationKey, InboundMessage, Prompt, Reply, TenantId};
pub use repository::{InMemoryReplyRepository, ReplyRepository, SqliteReplyRepository};
