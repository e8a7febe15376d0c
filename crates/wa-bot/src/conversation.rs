//! Per-chat conversation state
//!
//! Keyed by [`ConversationKey`]. A tenant must be opened before any of its
//! chats can hold state; closing the tenant drops every chat under it.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use serde::Serialize;
use tracing::debug;

use wa_core::{ConversationKey, TenantId};

/// Where a chat currently is in its conversation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversationState {
    /// Messages sent by the bot since the last prompt, prompt included
    pub message_count: u32,
    /// Next inbound message restarts from the prompt
    pub ending: bool,
    /// Body of the last message the bot sent
    pub last_sent: Option<String>,
}

impl ConversationState {
    /// The next inbound message gets the opening prompt
    pub fn needs_prompt(&self) -> bool {
        self.message_count == 0 || self.ending
    }

    /// Record that the prompt was sent
    pub fn start(&mut self, prompt: &str) {
        self.message_count = 1;
        self.ending = false;
        self.last_sent = Some(prompt.to_string());
    }

    /// Record that a matched reply was sent
    pub fn advance(&mut self, body: &str, ending: bool) {
        self.message_count = self.message_count.saturating_add(1);
        self.ending = ending;
        self.last_sent = Some(body.to_string());
    }
}

/// In-memory table of conversation states
#[derive(Clone, Default)]
pub struct ConversationTable {
    tenants: Arc<DashSet<TenantId>>,
    states: Arc<DashMap<ConversationKey, ConversationState>>,
}

impl ConversationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow chats of `tenant` to hold state
    pub fn open_tenant(&self, tenant: &TenantId) {
        self.tenants.insert(tenant.clone());
    }

    /// Drop the tenant and all of its chats, returning how many were dropped
    pub fn close_tenant(&self, tenant: &TenantId) -> usize {
        self.tenants.remove(tenant);
        let before = self.states.len();
        self.states.retain(|key, _| &key.tenant != tenant);
        let dropped = before.saturating_sub(self.states.len());
        debug!(tenant = %tenant, dropped, "Closed conversation table for tenant");
        dropped
    }

    pub fn is_open(&self, tenant: &TenantId) -> bool {
        self.tenants.contains(tenant)
    }

    /// State of the chat, created empty on first use
    ///
    /// Returns `None` if the tenant is not open.
    pub fn get_or_create(&self, key: &ConversationKey) -> Option<ConversationState> {
        if !self.is_open(&key.tenant) {
            return None;
        }
        Some(self.states.entry(key.clone()).or_default().clone())
    }

    pub fn get(&self, key: &ConversationKey) -> Option<ConversationState> {
        self.states.get(key).map(|s| s.clone())
    }

    /// Store the chat's state. Dropped if the tenant was closed meanwhile.
    pub fn save(&self, key: ConversationKey, state: ConversationState) -> bool {
        if !self.is_open(&key.tenant) {
            return false;
        }
        let tenant = key.tenant.clone();
        self.states.insert(key.clone(), state);
        // A close_tenant racing with this insert must still win.
        if !self.is_open(&tenant) {
            self.states.remove(&key);
            return false;
        }
        true
    }

    /// Reset every chat of the tenant to prompt mode on its next message
    ///
    /// Only the ending flag changes; counts and last bodies are kept.
    pub fn clear_ending_flags(&self, tenant: &TenantId) -> usize {
        let mut cleared = 0;
        for mut entry in self.states.iter_mut() {
            if &entry.key().tenant == tenant && entry.ending {
                entry.ending = false;
                cleared += 1;
            }
        }
        cleared
    }

    /// Number of chats tracked for the tenant
    pub fn tenant_len(&self, tenant: &TenantId) -> usize {
        self.states.iter().filter(|entry| &entry.key().tenant == tenant).count()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wa_core::ChatId;

    fn key(tenant: &str, chat: &str) -> ConversationKey {
        ConversationKey::new(TenantId::from(tenant), ChatId::from(chat))
    }

    #[test]
    fn test_advance_saturates_message_count() {
        let mut state = ConversationState {
            message_count: u32::MAX,
            ending: false,
            last_sent: Some("A".to_string()),
        };

        state.advance("B", false);

        assert_eq!(state.message_count, u32::MAX);
        assert!(!state.needs_prompt());
        assert_eq!(state.last_sent.as_deref(), Some("B"));
    }

    #[test]
    fn test_closed_tenant_has_no_state() {
        let table = ConversationTable::new();
        assert!(table.get_or_create(&key("acme", "1@c.us")).is_none());
        assert!(!table.save(key("acme", "1@c.us"), ConversationState::default()));
        assert!(table.is_empty());
    }

    #[test]
    fn test_lazy_creation() {
        let table = ConversationTable::new();
        table.open_tenant(&TenantId::from("acme"));

        let state = table.get_or_create(&key("acme", "1@c.us")).unwrap();
        assert_eq!(state, ConversationState::default());
        assert!(state.needs_prompt());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_state_transitions() {
        let mut state = ConversationState::default();
        state.start("Welcome");
        assert_eq!(state.message_count, 1);
        assert!(!state.needs_prompt());

        state.advance("Bye", true);
        assert_eq!(state.message_count, 2);
        assert_eq!(state.last_sent.as_deref(), Some("Bye"));
        assert!(state.needs_prompt());
    }

    #[test]
    fn test_clear_ending_flags_scoped_to_tenant() {
        let table = ConversationTable::new();
        table.open_tenant(&TenantId::from("acme"));
        table.open_tenant(&TenantId::from("other"));

        let ended = ConversationState {
            message_count: 3,
            ending: true,
            last_sent: Some("Bye".to_string()),
        };
        table.save(key("acme", "1@c.us"), ended.clone());
        table.save(key("acme", "2@c.us"), ended.clone());
        table.save(key("other", "1@c.us"), ended.clone());

        assert_eq!(table.clear_ending_flags(&TenantId::from("acme")), 2);

        let state = table.get(&key("acme", "1@c.us")).unwrap();
        assert!(!state.ending);
        assert_eq!(state.message_count, 3);
        assert_eq!(state.last_sent.as_deref(), Some("Bye"));
        assert!(table.get(&key("other", "1@c.us")).unwrap().ending);
    }

    #[test]
    fn test_close_tenant_drops_only_its_chats() {
        let table = ConversationTable::new();
        table.open_tenant(&TenantId::from("acme"));
        table.open_tenant(&TenantId::from("other"));
        table.get_or_create(&key("acme", "1@c.us"));
        table.get_or_create(&key("acme", "2@c.us"));
        table.get_or_create(&key("other", "1@c.us"));

        assert_eq!(table.close_tenant(&TenantId::from("acme")), 2);
        assert!(!table.is_open(&TenantId::from("acme")));
        assert_eq!(table.tenant_len(&TenantId::from("acme")), 0);
        assert_eq!(table.tenant_len(&TenantId::from("other")), 1);
    }
}
