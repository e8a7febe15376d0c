//! In-memory reply repository

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::ReplyRepository;
use crate::models::{Prompt, Reply, TenantId};
use crate::Result;

#[derive(Debug, Default)]
struct TenantRecords {
    prompt: Option<Prompt>,
    replies: Vec<Reply>,
}

/// In-memory repository, used by tests and local runs without a database
#[derive(Debug, Default, Clone)]
pub struct InMemoryReplyRepository {
    tenants: Arc<RwLock<HashMap<TenantId, TenantRecords>>>,
}

impl InMemoryReplyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the prompt of a tenant
    pub async fn set_prompt(&self, tenant: &TenantId, prompt: Prompt) {
        let mut tenants = self.tenants.write().await;
        tenants.entry(tenant.clone()).or_default().prompt = Some(prompt);
    }

    /// Add a reply to a tenant
    pub async fn add_reply(&self, tenant: &TenantId, reply: Reply) {
        let mut tenants = self.tenants.write().await;
        tenants.entry(tenant.clone()).or_default().replies.push(reply);
    }
}

#[async_trait]
impl ReplyRepository for InMemoryReplyRepository {
    async fn find_prompt(&self, tenant: &TenantId) -> Result<Option<Prompt>> {
        let tenants = self.tenants.read().await;
        Ok(tenants
            .get(tenant)
            .and_then(|records| records.prompt.clone())
            .filter(|prompt| prompt.available))
    }

    async fn find_reply(&self, tenant: &TenantId, trigger: &str) -> Result<Option<Reply>> {
        let wanted = trigger.to_lowercase();
        let tenants = self.tenants.read().await;
        Ok(tenants.get(tenant).and_then(|records| {
            records
                .replies
                .iter()
                .find(|reply| reply.available && reply.trigger.to_lowercase() == wanted)
                .cloned()
        }))
    }
}
