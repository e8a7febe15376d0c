//! Contract between the bot and the WhatsApp protocol client
//!
//! A client reports what happens on its connection as [`ClientEvent`]s on a
//! single ordered channel per tenant. The bot drives the client through
//! [`WhatsAppClient`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use wa_core::{ChatId, InboundMessage, TenantId};

use crate::error::{SendError, TransportError};

/// Something that happened on a tenant's WhatsApp connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Pairing code issued, raw payload to be rendered as a QR code
    Qr(String),
    /// Authenticated and ready to send
    Ready,
    /// Inbound message
    Message(InboundMessage),
    /// Stored credentials were rejected
    AuthFailure(String),
    /// Connection ended from the remote side
    Disconnected(String),
}

impl ClientEvent {
    /// Events after which the session is over
    pub fn is_terminal(&self) -> bool {
        matches!(self, ClientEvent::AuthFailure(_) | ClientEvent::Disconnected(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Qr(_) => "qr",
            ClientEvent::Ready => "ready",
            ClientEvent::Message(_) => "message",
            ClientEvent::AuthFailure(_) => "auth_failure",
            ClientEvent::Disconnected(_) => "disconnected",
        }
    }
}

/// Sending half of a tenant's event channel
pub type EventSender = mpsc::UnboundedSender<ClientEvent>;

/// Handle to one tenant's WhatsApp client
#[async_trait]
pub trait WhatsAppClient: Send + Sync {
    /// Open or resume the session
    async fn initialize(&self) -> Result<(), TransportError>;

    /// Send a text message, optionally as a reply quoting `quoted`
    async fn send_text(
        &self,
        chat: &ChatId,
        body: &str,
        quoted: Option<&str>,
    ) -> Result<(), SendError>;

    /// Tear the session down completely
    async fn destroy(&self) -> Result<(), TransportError>;

    /// Log the session out, keeping the client process alive
    async fn logout(&self) -> Result<(), TransportError> {
        Err(TransportError::Unsupported)
    }
}

/// Builds clients bound to a tenant's credential directory
///
/// The created client must push its events into `events` and drop every
/// clone of it once the client itself is dropped, so the tenant's event
/// worker can finish.
pub trait ClientFactory: Send + Sync {
    fn create(
        &self,
        tenant: &TenantId,
        credential_dir: &Path,
        events: EventSender,
    ) -> Arc<dyn WhatsAppClient>;
}
