//! wa-bot: multi-tenant WhatsApp auto-reply bot
//!
//! Each tenant gets its own WhatsApp client session. Inbound messages are
//! answered from the tenant's trigger table; an "ending" reply sends the
//! conversation back to the tenant's opening prompt.
//!
//! The WhatsApp protocol client itself stays behind the [`WhatsAppClient`]
//! and [`ClientFactory`] traits. [`bridge`] provides an implementation that
//! drives an external WhatsApp Web bridge over HTTP.

pub mod bridge;
pub mod conversation;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod session;
pub mod transport;
pub mod webhook;

pub use bridge::{BridgeClient, BridgeClientFactory};
pub use conversation::{ConversationState, ConversationTable};
pub use credentials::{CleanupOutcome, CredentialStore};
pub use dispatcher::{DispatchOutcome, DropReason, MessageDispatcher};
pub use error::{BotError, Result, SendError, TransportError};
pub use lifecycle::{DisconnectOutcome, SessionManager};
pub use session::{SessionHandle, SessionInfo, SessionStatus, SessionStore};
pub use transport::{ClientEvent, ClientFactory, EventSender, WhatsAppClient};
pub use webhook::{BridgeEvent, EventRouter, webhook_routes};
