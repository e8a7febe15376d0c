//! Scripted in-process transport
//!
//! Records outgoing messages and lets callers inject [`ClientEvent`]s. Used by
//! the test suites in place of a real WhatsApp connection.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use wa_core::{ChatId, TenantId};

use crate::error::{SendError, TransportError};
use crate::transport::{ClientEvent, ClientFactory, EventSender, WhatsAppClient};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A message handed to [`MockClient::send_text`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub chat: ChatId,
    pub body: String,
    pub quoted: Option<String>,
}

/// In-process client that records what it was asked to do
pub struct MockClient {
    tenant: TenantId,
    events: EventSender,
    sent: Mutex<Vec<SentMessage>>,
    send_failures: Mutex<Vec<SendError>>,
    initialized: AtomicBool,
    destroyed: AtomicBool,
    logged_out: AtomicBool,
    fail_start: bool,
    supports_destroy: bool,
    destroy_delay: Option<Duration>,
}

impl MockClient {
    pub fn new(tenant: impl Into<TenantId>, events: EventSender) -> Self {
        Self {
            tenant: tenant.into(),
            events,
            sent: Mutex::new(Vec::new()),
            send_failures: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            logged_out: AtomicBool::new(false),
            fail_start: false,
            supports_destroy: true,
            destroy_delay: None,
        }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Push an event as if it came from the WhatsApp connection
    pub fn emit(&self, event: ClientEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Make the next sends fail, in order
    pub fn fail_next_sends(&self, failures: impl IntoIterator<Item = SendError>) {
        lock(&self.send_failures).extend(failures);
    }

    /// Successfully delivered messages
    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }

    pub fn sent_bodies(&self) -> Vec<String> {
        lock(&self.sent).iter().map(|m| m.body.clone()).collect()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WhatsAppClient for MockClient {
    async fn initialize(&self) -> Result<(), TransportError> {
        if self.fail_start {
            return Err(TransportError::Closed("browser failed to launch".to_string()));
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send_text(
        &self,
        chat: &ChatId,
        body: &str,
        quoted: Option<&str>,
    ) -> Result<(), SendError> {
        {
            let mut failures = lock(&self.send_failures);
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
        }
        lock(&self.sent).push(SentMessage {
            chat: chat.clone(),
            body: body.to_string(),
            quoted: quoted.map(str::to_string),
        });
        Ok(())
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        if let Some(delay) = self.destroy_delay {
            tokio::time::sleep(delay).await;
        }
        if !self.supports_destroy {
            return Err(TransportError::Unsupported);
        }
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.logged_out.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory handing out [`MockClient`]s
#[derive(Clone, Default)]
pub struct MockClientFactory {
    clients: Arc<Mutex<HashMap<TenantId, Arc<MockClient>>>>,
    credential_dirs: Arc<Mutex<HashMap<TenantId, PathBuf>>>,
    fail_start: Arc<Mutex<HashSet<TenantId>>>,
    logout_only: Arc<Mutex<HashSet<TenantId>>>,
    slow_destroy: Arc<Mutex<HashMap<TenantId, Duration>>>,
    created: Arc<AtomicUsize>,
}

impl MockClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clients created for `tenant` from now on fail to start
    pub fn fail_start_for(&self, tenant: &TenantId) {
        lock(&self.fail_start).insert(tenant.clone());
    }

    /// Clients created for `tenant` from now on only support logout
    pub fn logout_only_for(&self, tenant: &TenantId) {
        lock(&self.logout_only).insert(tenant.clone());
    }

    /// Clients created for `tenant` from now on take `delay` to be destroyed
    pub fn slow_destroy_for(&self, tenant: &TenantId, delay: Duration) {
        lock(&self.slow_destroy).insert(tenant.clone(), delay);
    }

    /// Most recently created client of `tenant`
    pub fn client(&self, tenant: &TenantId) -> Option<Arc<MockClient>> {
        lock(&self.clients).get(tenant).cloned()
    }

    pub fn credential_dir(&self, tenant: &TenantId) -> Option<PathBuf> {
        lock(&self.credential_dirs).get(tenant).cloned()
    }

    /// Number of clients created so far
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ClientFactory for MockClientFactory {
    fn create(
        &self,
        tenant: &TenantId,
        credential_dir: &Path,
        events: EventSender,
    ) -> Arc<dyn WhatsAppClient> {
        let mut client = MockClient::new(tenant.clone(), events);
        client.fail_start = lock(&self.fail_start).contains(tenant);
        client.supports_destroy = !lock(&self.logout_only).contains(tenant);
        client.destroy_delay = lock(&self.slow_destroy).get(tenant).copied();

        let client = Arc::new(client);
        lock(&self.clients).insert(tenant.clone(), Arc::clone(&client));
        lock(&self.credential_dirs).insert(tenant.clone(), credential_dir.to_path_buf());
        self.created.fetch_add(1, Ordering::SeqCst);
        client
    }
}
