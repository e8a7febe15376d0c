//! Tenant session lifecycle
//!
//! Creates tenant sessions, feeds each session's events through one ordered
//! worker task, and tears sessions down on request or when the connection
//! ends. Teardown always:
//!
//! 1. shuts the client down (destroy, falling back to logout)
//! 2. emits exactly one `client.disconnected`
//! 3. drops every conversation of the tenant
//! 4. removes the tenant's credential directory
//! 5. drops the session entry
//!
//! The entry stays in the store as `disconnected` until the last step, so a
//! new `initialize` cannot start a session whose state the old teardown is
//! still deleting.
//!
//! Explicit disconnects and terminal events race for the same session; only
//! the first one runs the teardown.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use wa_core::{EventNotifier, LifecycleEvent, ReplyRepository, TenantId};

use crate::conversation::ConversationTable;
use crate::credentials::CredentialStore;
use crate::dispatcher::MessageDispatcher;
use crate::error::{BotError, Result, TransportError};
use crate::session::{SessionHandle, SessionInfo, SessionStatus, SessionStore};
use crate::transport::{ClientEvent, ClientFactory, WhatsAppClient};

/// Result of [`SessionManager::disconnect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    Disconnected,
    /// No live session for the tenant
    NotFound,
}

/// Owns every tenant session
pub struct SessionManager {
    factory: Arc<dyn ClientFactory>,
    sessions: SessionStore,
    conversations: ConversationTable,
    dispatcher: MessageDispatcher,
    notifier: EventNotifier,
    credentials: CredentialStore,
}

impl SessionManager {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        replies: Arc<dyn ReplyRepository>,
        notifier: EventNotifier,
        credentials: CredentialStore,
    ) -> Arc<Self> {
        let sessions = SessionStore::new();
        let conversations = ConversationTable::new();
        let dispatcher = MessageDispatcher::new(sessions.clone(), conversations.clone(), replies);

        Arc::new(Self {
            factory,
            sessions,
            conversations,
            dispatcher,
            notifier,
            credentials,
        })
    }

    /// Start the tenant's session, or return the one already running
    pub async fn initialize(self: &Arc<Self>, tenant: &TenantId) -> Result<SessionHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        let credential_dir = self.credentials.path_for(tenant);

        let (handle, status, created) = self.sessions.get_or_insert_with(tenant, || {
            let client = self.factory.create(tenant, &credential_dir, tx);
            SessionHandle::new(tenant.clone(), client)
        });

        if !created {
            if !status.is_live() {
                return Err(BotError::SessionClosing(tenant.clone()));
            }
            debug!(tenant = %tenant, ?status, "Session already exists");
            return Ok(handle);
        }

        info!(tenant = %tenant, session_id = %handle.session_id(), "Initializing session");
        self.conversations.open_tenant(tenant);
        self.spawn_event_worker(tenant.clone(), handle.session_id(), rx);

        if let Err(e) = handle.client().initialize().await {
            error!(tenant = %tenant, error = %e, "Failed to start session");
            self.teardown(tenant, Some(handle.session_id()), false).await;
            return Err(BotError::SessionStart {
                tenant: tenant.clone(),
                source: e,
            });
        }

        debug!(tenant = %tenant, "Session started");
        Ok(handle)
    }

    /// Shut the tenant's session down and drop everything it owns
    pub async fn disconnect(&self, tenant: &TenantId) -> DisconnectOutcome {
        if self.teardown(tenant, None, true).await {
            DisconnectOutcome::Disconnected
        } else {
            info!(tenant = %tenant, "No session to disconnect");
            DisconnectOutcome::NotFound
        }
    }

    /// Disconnect every tenant concurrently and wait for all of them
    pub async fn shutdown_all(&self) {
        let tenants = self.sessions.tenants();
        if tenants.is_empty() {
            return;
        }

        info!(count = tenants.len(), "Disconnecting all sessions");
        let outcomes = join_all(tenants.iter().map(|tenant| self.disconnect(tenant))).await;

        let disconnected = outcomes
            .iter()
            .filter(|o| **o == DisconnectOutcome::Disconnected)
            .count();
        info!(disconnected, total = tenants.len(), "All sessions shut down");
    }

    pub fn status(&self, tenant: &TenantId) -> Option<SessionStatus> {
        self.sessions.status(tenant)
    }

    pub fn session(&self, tenant: &TenantId) -> Option<SessionInfo> {
        self.sessions.info(tenant)
    }

    pub fn tenants(&self) -> Vec<TenantId> {
        self.sessions.tenants()
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.snapshot()
    }

    pub fn conversations(&self) -> &ConversationTable {
        &self.conversations
    }

    pub fn notifier(&self) -> &EventNotifier {
        &self.notifier
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.notifier.subscribe()
    }

    fn spawn_event_worker(
        self: &Arc<Self>,
        tenant: TenantId,
        session_id: Uuid,
        mut rx: mpsc::UnboundedReceiver<ClientEvent>,
    ) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let terminal = event.is_terminal();
                manager.handle_event(&tenant, session_id, event).await;
                if terminal {
                    break;
                }
            }
            debug!(tenant = %tenant, session_id = %session_id, "Event worker stopped");
        });
    }

    async fn handle_event(&self, tenant: &TenantId, session_id: Uuid, event: ClientEvent) {
        if !self.sessions.is_current(tenant, session_id) {
            debug!(tenant = %tenant, kind = event.kind(), "Ignoring event from stale session");
            return;
        }

        match event {
            ClientEvent::Qr(payload) => {
                self.sessions
                    .set_status(tenant, session_id, SessionStatus::AwaitingAuth);
                info!(tenant = %tenant, "Pairing code issued");
                self.notifier.qr_code_created(tenant, payload);
            }
            ClientEvent::Ready => {
                self.sessions.set_status(tenant, session_id, SessionStatus::Ready);
                let reset = self.conversations.clear_ending_flags(tenant);
                info!(tenant = %tenant, reset, "Session ready");
                self.notifier.client_ready(tenant);
            }
            ClientEvent::Message(msg) => {
                self.dispatcher.on_inbound_message(tenant, &msg).await;
            }
            ClientEvent::AuthFailure(reason) => {
                error!(tenant = %tenant, reason = %reason, "Authentication failed");
                self.teardown(tenant, Some(session_id), true).await;
            }
            ClientEvent::Disconnected(reason) => {
                warn!(tenant = %tenant, reason = %reason, "Session disconnected");
                self.teardown(tenant, Some(session_id), true).await;
            }
        }
    }

    /// Returns `false` if another caller already owns the teardown
    async fn teardown(&self, tenant: &TenantId, session_id: Option<Uuid>, shutdown_client: bool) -> bool {
        let Some(handle) = self.sessions.begin_teardown(tenant, session_id) else {
            return false;
        };

        if shutdown_client {
            shutdown(tenant, handle.client().as_ref()).await;
        }

        self.notifier.client_disconnected(tenant);
        let dropped = self.conversations.close_tenant(tenant);
        self.credentials.remove(tenant).await;
        self.sessions.remove(tenant, handle.session_id());

        info!(tenant = %tenant, dropped_conversations = dropped, "Session torn down");
        true
    }
}

/// Destroy the client, or log it out if it cannot be destroyed
async fn shutdown(tenant: &TenantId, client: &dyn WhatsAppClient) {
    match client.destroy().await {
        Ok(()) => debug!(tenant = %tenant, "Client destroyed"),
        Err(TransportError::Unsupported) => match client.logout().await {
            Ok(()) => debug!(tenant = %tenant, "Client logged out"),
            Err(e) => warn!(tenant = %tenant, error = %e, "Failed to log client out"),
        },
        Err(e) => warn!(tenant = %tenant, error = %e, "Failed to destroy client"),
    }
}
