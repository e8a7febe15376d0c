//! Error types for wa-api

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use wa_bot::BotError;

/// wa-api error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("No pairing code available for {0}")]
    QrCodeNotFound(String),

    #[error("Failed to render pairing code: {0}")]
    QrRender(String),

    #[error("Session error: {0}")]
    Session(#[from] BotError),
}

/// Error body returned to API clients
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND"),
            ApiError::QrCodeNotFound(_) => (StatusCode::NOT_FOUND, "QRCODE_NOT_FOUND"),
            ApiError::Session(BotError::SessionClosing(_)) => (StatusCode::CONFLICT, "SESSION_CLOSING"),
            ApiError::Session(BotError::SessionStart { .. }) => (StatusCode::BAD_GATEWAY, "SESSION_START_FAILED"),
            ApiError::QrRender(_) => (StatusCode::INTERNAL_SERVER_ERROR, "QRCODE_RENDER_FAILED"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ApiError>;
