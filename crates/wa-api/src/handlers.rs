//! HTTP API handlers
//!
//! Session control and pairing code endpoints for one enterprise (tenant).

use std::convert::Infallible;

use axum::{
    Json,
    extract::{Path, State},
    http::header,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use wa_bot::{DisconnectOutcome, SessionInfo, SessionStatus};
use wa_core::{LifecycleEvent, TenantId};

use crate::error::{ApiError, Result};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub tenant: TenantId,
    pub status: SessionStatus,
}

#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub tenant: TenantId,
    pub disconnected: bool,
}

/// GET /health
pub async fn health() -> &'static str {
    "OK"
}

/// GET /api/enterprises
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.manager.sessions())
}

/// POST /api/enterprises/{id}/initialize
pub async fn initialize(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>> {
    let tenant = TenantId::new(id);
    info!(tenant = %tenant, "Initialize requested");

    state.manager.initialize(&tenant).await?;
    let status = state
        .manager
        .status(&tenant)
        .unwrap_or(SessionStatus::Disconnected);

    Ok(Json(SessionResponse { tenant, status }))
}

/// POST /api/enterprises/{id}/disconnect
pub async fn disconnect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DisconnectResponse>> {
    let tenant = TenantId::new(id);
    info!(tenant = %tenant, "Disconnect requested");

    match state.manager.disconnect(&tenant).await {
        DisconnectOutcome::Disconnected => Ok(Json(DisconnectResponse {
            tenant,
            disconnected: true,
        })),
        DisconnectOutcome::NotFound => Err(ApiError::SessionNotFound(tenant.to_string())),
    }
}

/// GET /api/enterprises/{id}/qrcode
///
/// Latest pairing code of the tenant as an SVG image.
pub async fn qrcode(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse> {
    let tenant = TenantId::new(id);
    let code = state
        .qr_cache
        .get(&tenant)
        .ok_or_else(|| ApiError::QrCodeNotFound(tenant.to_string()))?;

    let svg = code.to_svg().map_err(|e| {
        warn!(tenant = %tenant, error = %e, "Pairing code does not fit a QR code");
        ApiError::QrRender(e.to_string())
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/svg+xml"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        svg,
    ))
}

/// GET /api/enterprises/{id}/qrcode/stream
pub async fn qrcode_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let tenant = TenantId::new(id);
    debug!(tenant = %tenant, "QR code stream opened");

    // Subscribe before reading the cache so no code falls in between.
    let rx = state.manager.subscribe();
    let cached = state
        .qr_cache
        .get(&tenant)
        .map(|code| Ok(Event::default().event("qrcode").data(code.payload)));

    let updates = stream::unfold((rx, tenant), |(mut rx, tenant)| async move {
        loop {
            match rx.recv().await {
                Ok(event) if event.tenant() == &tenant => {
                    return Some((Ok::<_, Infallible>(sse_event(&event)), (rx, tenant)));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream::iter(cached).chain(updates)).keep_alive(KeepAlive::default())
}

fn sse_event(event: &LifecycleEvent) -> Event {
    match event {
        LifecycleEvent::QrCodeCreated { payload, .. } => Event::default().event("qrcode").data(payload),
        LifecycleEvent::ClientReady { tenant } => Event::default().event("ready").data(tenant.as_str()),
        LifecycleEvent::ClientDisconnected { tenant } => {
            Event::default().event("disconnected").data(tenant.as_str())
        }
    }
}
