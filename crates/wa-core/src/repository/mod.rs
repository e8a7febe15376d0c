//! Reply and prompt lookup
//!
//! The bot only reads from the data store: one prompt per tenant and a table
//! of trigger/reply pairs.

mod memory;
mod store;

use async_trait::async_trait;

use crate::models::{Prompt, Reply, TenantId};
use crate::Result;

pub use memory::InMemoryReplyRepository;
pub use store::SqliteReplyRepository;

/// Read-only access to a tenant's prompt and replies
#[async_trait]
pub trait ReplyRepository: Send + Sync {
    /// Available conversation-starting prompt of the tenant, if any
    async fn find_prompt(&self, tenant: &TenantId) -> Result<Option<Prompt>>;

    /// Available reply whose trigger equals `trigger`, ignoring case
    async fn find_reply(&self, tenant: &TenantId, trigger: &str) -> Result<Option<Reply>>;
}
