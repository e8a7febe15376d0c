//! Route definitions

use axum::{
    Router,
    routing::{get, post},
};

use crate::handlers::{disconnect, health, initialize, list_sessions, qrcode, qrcode_stream};
use crate::server::AppState;

/// Create the API router
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/enterprises", get(list_sessions))
        .route("/api/enterprises/{id}/initialize", post(initialize))
        .route("/api/enterprises/{id}/disconnect", post(disconnect))
        .route("/api/enterprises/{id}/qrcode", get(qrcode))
        .route("/api/enterprises/{id}/qrcode/stream", get(qrcode_stream))
}
