//! Lifecycle event notification
//!
//! Fire-and-forget publish/subscribe of session lifecycle events. Events are
//! delivered at most once to each subscriber present at publish time; late
//! subscribers get no replay.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::models::TenantId;

/// Lifecycle event emitted by the session manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum LifecycleEvent {
    /// A pairing code was issued and should be shown to the user
    #[serde(rename = "qrcode.created")]
    QrCodeCreated { tenant: TenantId, payload: String },

    /// The session finished authenticating
    #[serde(rename = "client.ready")]
    ClientReady { tenant: TenantId },

    /// The session is gone (explicit disconnect, auth failure, start failure)
    #[serde(rename = "client.disconnected")]
    ClientDisconnected { tenant: TenantId },
}

impl LifecycleEvent {
    /// Tenant the event belongs to
    pub fn tenant(&self) -> &TenantId {
        match self {
            Self::QrCodeCreated { tenant, .. }
            | Self::ClientReady { tenant }
            | Self::ClientDisconnected { tenant } => tenant,
        }
    }

    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            Self::QrCodeCreated { .. } => "qrcode.created",
            Self::ClientReady { .. } => "client.ready",
            Self::ClientDisconnected { .. } => "client.disconnected",
        }
    }
}

/// Broadcast channel for lifecycle events
#[derive(Debug, Clone)]
pub struct EventNotifier {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventNotifier {
    /// Create a notifier buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: LifecycleEvent) {
        trace!(event = event.name(), tenant = %event.tenant(), "Publishing lifecycle event");
        if let Err(e) = self.tx.send(event) {
            debug!("No subscribers for lifecycle event {}", e.0.name());
        }
    }

    pub fn qr_code_created(&self, tenant: &TenantId, payload: impl Into<String>) {
        self.publish(LifecycleEvent::QrCodeCreated {
            tenant: tenant.clone(),
            payload: payload.into(),
        });
    }

    pub fn client_ready(&self, tenant: &TenantId) {
        self.publish(LifecycleEvent::ClientReady {
            tenant: tenant.clone(),
        });
    }

    pub fn client_disconnected(&self, tenant: &TenantId) {
        self.publish(LifecycleEvent::ClientDisconnected {
            tenant: tenant.clone(),
        });
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}
