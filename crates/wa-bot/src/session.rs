//! Tenant session store
//!
//! Thread-safe session storage using DashMap. One entry per tenant; every
//! entry carries a generation id so that late events from a replaced client
//! can be told apart from the live one.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use uuid::Uuid;

use wa_core::TenantId;

use crate::transport::WhatsAppClient;

/// Lifecycle status of a tenant session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    AwaitingAuth,
    Ready,
    /// Teardown in progress
    Disconnected,
}

impl SessionStatus {
    pub fn is_live(self) -> bool {
        self != SessionStatus::Disconnected
    }
}

/// Cloneable handle to a tenant's client
#[derive(Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    tenant: TenantId,
    client: Arc<dyn WhatsAppClient>,
}

impl SessionHandle {
    pub fn new(tenant: TenantId, client: Arc<dyn WhatsAppClient>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            tenant,
            client,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn client(&self) -> &Arc<dyn WhatsAppClient> {
        &self.client
    }

    /// Both handles point at the same session instance
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        self.session_id == other.session_id && Arc::ptr_eq(&self.client, &other.client)
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session_id)
            .field("tenant", &self.tenant)
            .finish_non_exhaustive()
    }
}

/// Read-only view of a session for observers
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub tenant: TenantId,
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

struct TenantSession {
    handle: SessionHandle,
    status: SessionStatus,
    created_at: DateTime<Utc>,
}

impl TenantSession {
    fn info(&self) -> SessionInfo {
        SessionInfo {
            tenant: self.handle.tenant.clone(),
            session_id: self.handle.session_id,
            status: self.status,
            created_at: self.created_at,
        }
    }
}

/// In-memory store of tenant sessions
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<DashMap<TenantId, TenantSession>>,
}

impl SessionStore {
    /// Create a new session store
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the existing session of `tenant`, or insert the one built by `make`
    ///
    /// The boolean is `true` when a new session was inserted.
    pub fn get_or_insert_with<F>(&self, tenant: &TenantId, make: F) -> (SessionHandle, SessionStatus, bool)
    where
        F: FnOnce() -> SessionHandle,
    {
        match self.sessions.entry(tenant.clone()) {
            Entry::Occupied(entry) => {
                let session = entry.get();
                (session.handle.clone(), session.status, false)
            }
            Entry::Vacant(entry) => {
                let handle = make();
                entry.insert(TenantSession {
                    handle: handle.clone(),
                    status: SessionStatus::Initializing,
                    created_at: Utc::now(),
                });
                (handle, SessionStatus::Initializing, true)
            }
        }
    }

    /// Handle of the tenant's session, unless it is being torn down
    pub fn live(&self, tenant: &TenantId) -> Option<SessionHandle> {
        self.sessions
            .get(tenant)
            .filter(|s| s.status.is_live())
            .map(|s| s.handle.clone())
    }

    pub fn status(&self, tenant: &TenantId) -> Option<SessionStatus> {
        self.sessions.get(tenant).map(|s| s.status)
    }

    pub fn info(&self, tenant: &TenantId) -> Option<SessionInfo> {
        self.sessions.get(tenant).map(|s| s.info())
    }

    /// Whether `session_id` is the tenant's live session
    pub fn is_current(&self, tenant: &TenantId, session_id: Uuid) -> bool {
        self.sessions
            .get(tenant)
            .is_some_and(|s| s.handle.session_id == session_id && s.status.is_live())
    }

    /// Update the status of the tenant's live session `session_id`
    pub fn set_status(&self, tenant: &TenantId, session_id: Uuid, status: SessionStatus) -> bool {
        match self.sessions.get_mut(tenant) {
            Some(mut s) if s.handle.session_id == session_id && s.status.is_live() => {
                s.status = status;
                true
            }
            _ => false,
        }
    }

    /// Mark the session as disconnecting and hand it to the caller
    ///
    /// Only the first caller gets the handle; later callers (and callers
    /// naming another generation) get `None`.
    pub fn begin_teardown(&self, tenant: &TenantId, session_id: Option<Uuid>) -> Option<SessionHandle> {
        let mut session = self.sessions.get_mut(tenant)?;
        if !session.status.is_live() {
            return None;
        }
        if session_id.is_some_and(|id| id != session.handle.session_id) {
            return None;
        }
        session.status = SessionStatus::Disconnected;
        Some(session.handle.clone())
    }

    /// Remove the tenant's session if it still is generation `session_id`
    pub fn remove(&self, tenant: &TenantId, session_id: Uuid) -> Option<SessionHandle> {
        self.sessions
            .remove_if(tenant, |_, s| s.handle.session_id == session_id)
            .map(|(_, s)| s.handle)
    }

    /// All tenants with a session entry
    pub fn tenants(&self) -> Vec<TenantId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self.sessions.iter().map(|entry| entry.info()).collect();
        sessions.sort_by(|a, b| a.tenant.cmp(&b.tenant));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
