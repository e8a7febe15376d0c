//! Domain types shared across the gateway

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a tenant (enterprise)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TenantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of a WhatsApp chat (e.g. `5511999999999@c.us`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ChatId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Composite key of a conversation: one chat under one tenant
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub tenant: TenantId,
    pub chat: ChatId,
}

impl ConversationKey {
    pub fn new(tenant: TenantId, chat: ChatId) -> Self {
        Self { tenant, chat }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.chat)
    }
}

/// Conversation-starting message configured for a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub body: String,
    pub available: bool,
}

/// Canned reply selected by a trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// Matched case-insensitively against the inbound body
    pub trigger: String,
    pub body: String,
    /// Next inbound message restarts the conversation from the prompt
    pub ending: bool,
    pub available: bool,
}

/// Transport-neutral inbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Message id, used to quote the message when replying
    pub id: String,
    /// Chat the message came from
    pub from: ChatId,
    pub body: String,
    /// Sent by the bot's own account
    #[serde(default)]
    pub from_me: bool,
    /// Status broadcast (stories), never answered
    #[serde(default)]
    pub is_status_broadcast: bool,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// Create a plain inbound text message
    pub fn text(id: impl Into<String>, from: impl Into<ChatId>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            body: body.into(),
            from_me: false,
            is_status_broadcast: false,
            timestamp: Utc::now(),
        }
    }
}
