//! Inbound message handling
//!
//! Decides what to answer for each inbound message and keeps the chat's
//! conversation state up to date:
//!
//! - first message, or first message after an ending reply: send the
//!   tenant's prompt
//! - otherwise: send the reply whose trigger matches the message, or repeat
//!   the last message when nothing matches
//!
//! Errors never leave the dispatcher. They are classified and logged here.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use wa_core::{ConversationKey, InboundMessage, Prompt, Reply, ReplyRepository, TenantId};

use crate::conversation::{ConversationState, ConversationTable};
use crate::error::SendError;
use crate::session::{SessionHandle, SessionStore};

/// Why a message was dropped without an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Tenant has no live session
    NoSession,
    /// Conversation had to start but the tenant has no prompt
    NoPrompt,
}

/// What the dispatcher did with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Own message or status broadcast
    Ignored,
    Dropped(DropReason),
    PromptSent,
    ReplySent,
    /// No trigger matched, last message sent again
    Repeated,
    /// No trigger matched and nothing was sent before
    Silent,
}

/// Answers inbound messages for every tenant
pub struct MessageDispatcher {
    sessions: SessionStore,
    conversations: ConversationTable,
    replies: Arc<dyn ReplyRepository>,
}

impl MessageDispatcher {
    pub fn new(
        sessions: SessionStore,
        conversations: ConversationTable,
        replies: Arc<dyn ReplyRepository>,
    ) -> Self {
        Self {
            sessions,
            conversations,
            replies,
        }
    }

    /// Handle one inbound message of `tenant`
    pub async fn on_inbound_message(&self, tenant: &TenantId, msg: &InboundMessage) -> DispatchOutcome {
        if msg.from_me || msg.is_status_broadcast {
            debug!(tenant = %tenant, chat = %msg.from, "Ignoring own or broadcast message");
            return DispatchOutcome::Ignored;
        }

        let Some(session) = self.sessions.live(tenant) else {
            warn!(tenant = %tenant, chat = %msg.from, "No live session, dropping message");
            return DispatchOutcome::Dropped(DropReason::NoSession);
        };

        let key = ConversationKey::new(tenant.clone(), msg.from.clone());
        let Some(mut state) = self.conversations.get_or_create(&key) else {
            warn!(tenant = %tenant, chat = %msg.from, "No conversation table for tenant, dropping message");
            return DispatchOutcome::Dropped(DropReason::NoSession);
        };

        let (outcome, outgoing) = self.advance(tenant, msg, &mut state).await;

        // Saved before sending: a failed send never rolls the state back.
        self.conversations.save(key, state);

        if let Some(body) = outgoing {
            self.deliver(&session, msg, &body).await;
        }

        debug!(tenant = %tenant, chat = %msg.from, ?outcome, "Message dispatched");
        outcome
    }

    async fn advance(
        &self,
        tenant: &TenantId,
        msg: &InboundMessage,
        state: &mut ConversationState,
    ) -> (DispatchOutcome, Option<String>) {
        if state.needs_prompt() {
            let Some(prompt) = self.find_prompt(tenant).await else {
                warn!(tenant = %tenant, chat = %msg.from, "No available prompt, dropping message");
                return (DispatchOutcome::Dropped(DropReason::NoPrompt), None);
            };
            state.start(&prompt.body);
            info!(tenant = %tenant, chat = %msg.from, "Starting conversation");
            return (DispatchOutcome::PromptSent, Some(prompt.body));
        }

        match self.find_reply(tenant, &msg.body).await {
            Some(reply) => {
                state.advance(&reply.body, reply.ending);
                (DispatchOutcome::ReplySent, Some(reply.body))
            }
            None => match &state.last_sent {
                Some(last) => {
                    debug!(tenant = %tenant, chat = %msg.from, "No trigger matched, repeating last message");
                    (DispatchOutcome::Repeated, Some(last.clone()))
                }
                None => {
                    warn!(tenant = %tenant, chat = %msg.from, "No trigger matched and nothing to repeat");
                    (DispatchOutcome::Silent, None)
                }
            },
        }
    }

    async fn find_prompt(&self, tenant: &TenantId) -> Option<Prompt> {
        match self.replies.find_prompt(tenant).await {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "Prompt lookup failed");
                None
            }
        }
    }

    async fn find_reply(&self, tenant: &TenantId, trigger: &str) -> Option<Reply> {
        match self.replies.find_reply(tenant, trigger).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "Reply lookup failed");
                None
            }
        }
    }

    /// Send `body` as a reply to `msg`, falling back to a plain message once
    async fn deliver(&self, session: &SessionHandle, msg: &InboundMessage, body: &str) {
        let tenant = session.tenant();
        let client = session.client();

        let err = match client.send_text(&msg.from, body, Some(&msg.id)).await {
            Ok(()) => return,
            Err(e) => e,
        };

        match err {
            SendError::QuotedMessageGone => {
                warn!(tenant = %tenant, chat = %msg.from, "Quoted message gone, sending without quote");
                if let Err(e) = client.send_text(&msg.from, body, None).await {
                    error!(tenant = %tenant, chat = %msg.from, error = %e, "Fallback send failed");
                }
            }
            SendError::Transient(reason) => {
                warn!(
                    tenant = %tenant,
                    chat = %msg.from,
                    reason = %reason,
                    "Transient transport failure while sending, waiting for the session to terminate"
                );
            }
            SendError::Other(reason) => {
                error!(tenant = %tenant, chat = %msg.from, reason = %reason, "Failed to send message");
            }
        }
    }
}
