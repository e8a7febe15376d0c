//! Webhook receiving connection events from the WhatsApp bridge

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    routing::post,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use wa_core::{InboundMessage, TenantId};

use crate::transport::{ClientEvent, EventSender};

/// Callback payload posted by the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    Qr { qr: String },
    Ready,
    Message { message: InboundMessage },
    AuthFailure { reason: String },
    Disconnected { reason: String },
}

impl From<BridgeEvent> for ClientEvent {
    fn from(event: BridgeEvent) -> Self {
        match event {
            BridgeEvent::Qr { qr } => ClientEvent::Qr(qr),
            BridgeEvent::Ready => ClientEvent::Ready,
            BridgeEvent::Message { message } => ClientEvent::Message(message),
            BridgeEvent::AuthFailure { reason } => ClientEvent::AuthFailure(reason),
            BridgeEvent::Disconnected { reason } => ClientEvent::Disconnected(reason),
        }
    }
}

/// Maps tenants to the event channel of their current client
#[derive(Clone, Default)]
pub struct EventRouter {
    channels: Arc<DashMap<TenantId, EventSender>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route the tenant's events to `sender`, replacing any previous channel
    pub fn register(&self, tenant: &TenantId, sender: EventSender) {
        self.channels.insert(tenant.clone(), sender);
    }

    /// Stop routing the tenant's events, unless a newer channel replaced `sender`
    pub fn unregister_if_same(&self, tenant: &TenantId, sender: &EventSender) -> bool {
        self.channels
            .remove_if(tenant, |_, current| current.same_channel(sender))
            .is_some()
    }

    /// Push an event into the tenant's channel
    ///
    /// Returns `false` if the tenant has no open channel.
    pub fn forward(&self, tenant: &TenantId, event: ClientEvent) -> bool {
        let Some(sender) = self.channels.get(tenant).map(|s| s.clone()) else {
            return false;
        };
        sender.send(event).is_ok()
    }

    pub fn is_registered(&self, tenant: &TenantId) -> bool {
        self.channels.contains_key(tenant)
    }
}

#[derive(Clone)]
struct WebhookState {
    router: EventRouter,
    token: Option<Arc<str>>,
}

/// Routes serving the bridge callback endpoint
pub fn webhook_routes(router: EventRouter, token: Option<String>) -> Router {
    let state = WebhookState {
        router,
        token: token.map(Arc::from),
    };

    Router::new()
        .route("/webhook/bridge/{tenant}", post(handle_bridge_event))
        .with_state(state)
}

async fn handle_bridge_event(
    State(state): State<WebhookState>,
    Path(tenant): Path<String>,
    headers: HeaderMap,
    Json(event): Json<BridgeEvent>,
) -> StatusCode {
    if let Some(expected) = &state.token {
        let provided = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if provided != Some(expected.as_ref()) {
            warn!(tenant = %tenant, "Rejected bridge callback with bad token");
            return StatusCode::UNAUTHORIZED;
        }
    }

    let tenant = TenantId::new(tenant);
    let event = ClientEvent::from(event);
    debug!(tenant = %tenant, kind = event.kind(), "Bridge event received");

    if state.router.forward(&tenant, event) {
        StatusCode::OK
    } else {
        debug!(tenant = %tenant, "No session for bridge event");
        StatusCode::NOT_FOUND
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use super::*;

    fn post_event(tenant: &str, body: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(format!("/webhook/bridge/{}", tenant))
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[test]
    fn test_bridge_event_json() {
        let event: BridgeEvent = serde_json::from_str(r#"{"type":"qr","qr":"2@abc"}"#).unwrap();
        assert_eq!(ClientEvent::from(event), ClientEvent::Qr("2@abc".to_string()));

        let event: BridgeEvent = serde_json::from_str(
            r#"{"type":"message","message":{"id":"m1","from":"1@c.us","body":"oi"}}"#,
        )
        .unwrap();
        match ClientEvent::from(event) {
            ClientEvent::Message(msg) => {
                assert_eq!(msg.id, "m1");
                assert_eq!(msg.body, "oi");
                assert!(!msg.from_me);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unregister_keeps_newer_channel() {
        let router = EventRouter::new();
        let tenant = TenantId::from("acme");
        let (old_tx, _old_rx) = mpsc::unbounded_channel();
        let (new_tx, _new_rx) = mpsc::unbounded_channel();

        router.register(&tenant, old_tx.clone());
        router.register(&tenant, new_tx.clone());

        assert!(!router.unregister_if_same(&tenant, &old_tx));
        assert!(router.is_registered(&tenant));
        assert!(router.unregister_if_same(&tenant, &new_tx));
        assert!(!router.is_registered(&tenant));
    }

    #[tokio::test]
    async fn test_webhook_forwards_event() {
        let router = EventRouter::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.register(&TenantId::from("acme"), tx);
        let app = webhook_routes(router, None);

        let response = app
            .oneshot(post_event("acme", r#"{"type":"ready"}"#, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(rx.recv().await, Some(ClientEvent::Ready));
    }

    #[tokio::test]
    async fn test_webhook_unknown_tenant() {
        let app = webhook_routes(EventRouter::new(), None);
        let response = app
            .oneshot(post_event("ghost", r#"{"type":"ready"}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_webhook_checks_token() {
        let router = EventRouter::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.register(&TenantId::from("acme"), tx);
        let app = webhook_routes(router, Some("s3cret".to_string()));

        let response = app
            .clone()
            .oneshot(post_event("acme", r#"{"type":"ready"}"#, Some("wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(rx.try_recv().is_err());

        let response = app
            .oneshot(post_event(
                "acme",
                r#"{"type":"disconnected","reason":"LOGOUT"}"#,
                Some("s3cret"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            rx.recv().await,
            Some(ClientEvent::Disconnected("LOGOUT".to_string()))
        );
    }
}
