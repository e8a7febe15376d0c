//! Error types for wa-bot

use thiserror::Error;

use wa_core::TenantId;

/// wa-bot error type
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Failed to start session for tenant {tenant}: {source}")]
    SessionStart {
        tenant: TenantId,
        #[source]
        source: TransportError,
    },

    #[error("Session for tenant {0} is shutting down")]
    SessionClosing(TenantId),
}

/// Failure reported by a WhatsApp client for connection management calls
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Operation not supported by transport")]
    Unsupported,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Bridge API error: {0}")]
    Api(String),

    #[error("Transport closed: {0}")]
    Closed(String),

    #[error("Invalid {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Http(err.to_string())
    }
}

/// Failure to deliver an outgoing message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Replying failed because the quoted message context is gone
    #[error("Quoted message is no longer available")]
    QuotedMessageGone,

    /// Connection-level failure; the session is expected to terminate on its own
    #[error("Transient transport failure: {0}")]
    Transient(String),

    #[error("Send failed: {0}")]
    Other(String),
}

const QUOTE_MARKERS: &[&str] = &[
    "quoted message",
    "quotedmsg",
    "could not get the quoted message",
    "reply context",
];

const TRANSIENT_MARKERS: &[&str] = &[
    "network changed",
    "connection closed",
    "target closed",
    "session closed",
    "protocol error",
    "execution context was destroyed",
];

impl SendError {
    /// Classify a raw transport error message
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if QUOTE_MARKERS.iter().any(|m| lower.contains(m)) {
            SendError::QuotedMessageGone
        } else if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
            SendError::Transient(message.to_string())
        } else {
            SendError::Other(message.to_string())
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SendError::Transient(_))
    }
}

impl From<reqwest::Error> for SendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            SendError::Transient(err.to_string())
        } else {
            SendError::Other(err.to_string())
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, BotError>;
