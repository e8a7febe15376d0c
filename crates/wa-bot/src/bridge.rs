//! HTTP client for an external WhatsApp Web bridge
//!
//! The bridge hosts the protocol client. We start, drive and stop sessions
//! over its REST API; it reports back through the webhook in [`crate::webhook`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Serialize;
use tracing::{debug, info};

use wa_core::{BridgeConfig, ChatId, TenantId};

use crate::error::{SendError, TransportError};
use crate::transport::{ClientFactory, EventSender, WhatsAppClient};
use crate::webhook::EventRouter;

#[derive(Debug, Serialize)]
struct StartPayload<'a> {
    auth_dir: &'a Path,
    webhook: &'a str,
}

#[derive(Debug, Serialize)]
struct SendPayload<'a> {
    to: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    quoted_message_id: Option<&'a str>,
}

/// `base` with `segments` appended, each percent-encoded as one path segment
fn join_segments(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

fn parse_base(name: &str, value: &str) -> Result<Url, TransportError> {
    let url = Url::parse(value).map_err(|e| TransportError::InvalidUrl(format!("{} '{}': {}", name, value, e)))?;
    if url.cannot_be_a_base() {
        return Err(TransportError::InvalidUrl(format!("{} '{}' cannot take a path", name, value)));
    }
    Ok(url)
}

/// One tenant's session on the bridge
pub struct BridgeClient {
    http: Client,
    session_url: Url,
    token: Option<String>,
    tenant: TenantId,
    auth_dir: PathBuf,
    webhook_url: Url,
    events: EventSender,
    router: EventRouter,
}

impl BridgeClient {
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn webhook_url(&self) -> &str {
        self.webhook_url.as_str()
    }

    fn session_endpoint(&self, action: &str) -> Url {
        join_segments(&self.session_url, &[action])
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn error_text(response: Response) -> String {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        format!("{} - {}", status, text)
    }
}

#[async_trait]
impl WhatsAppClient for BridgeClient {
    async fn initialize(&self) -> Result<(), TransportError> {
        info!(tenant = %self.tenant, "Starting bridge session");

        let payload = StartPayload {
            auth_dir: &self.auth_dir,
            webhook: self.webhook_url.as_str(),
        };
        let response = self
            .authorized(self.http.post(self.session_endpoint("start")))
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Api(format!(
                "Failed to start session: {}",
                Self::error_text(response).await
            )));
        }
        Ok(())
    }

    async fn send_text(
        &self,
        chat: &ChatId,
        body: &str,
        quoted: Option<&str>,
    ) -> Result<(), SendError> {
        debug!(tenant = %self.tenant, chat = %chat, "Sending message through bridge");

        let payload = SendPayload {
            to: chat.as_str(),
            body,
            quoted_message_id: quoted,
        };
        let response = self
            .authorized(self.http.post(self.session_endpoint("messages")))
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SendError::classify(&Self::error_text(response).await));
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        let response = self
            .authorized(self.http.delete(self.session_url.clone()))
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED => Err(TransportError::Unsupported),
            _ => Err(TransportError::Api(format!(
                "Failed to destroy session: {}",
                Self::error_text(response).await
            ))),
        }
    }

    async fn logout(&self) -> Result<(), TransportError> {
        let response = self
            .authorized(self.http.post(self.session_endpoint("logout")))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Api(format!(
                "Failed to log out: {}",
                Self::error_text(response).await
            )));
        }
        Ok(())
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.router.unregister_if_same(&self.tenant, &self.events);
    }
}

/// Creates [`BridgeClient`]s and routes their webhook events
#[derive(Clone)]
pub struct BridgeClientFactory {
    http: Client,
    base_url: Url,
    token: Option<String>,
    webhook_base_url: Url,
    router: EventRouter,
}

impl BridgeClientFactory {
    /// Fails if either configured URL cannot take path segments
    pub fn new(config: &BridgeConfig, router: EventRouter) -> Result<Self, TransportError> {
        Ok(Self {
            http: Client::new(),
            base_url: parse_base("bridge URL", &config.base_url)?,
            token: config.token.clone(),
            webhook_base_url: parse_base("webhook base URL", &config.webhook_base_url)?,
            router,
        })
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }
}

impl ClientFactory for BridgeClientFactory {
    fn create(
        &self,
        tenant: &TenantId,
        credential_dir: &Path,
        events: EventSender,
    ) -> Arc<dyn WhatsAppClient> {
        self.router.register(tenant, events.clone());

        Arc::new(BridgeClient {
            http: self.http.clone(),
            session_url: join_segments(&self.base_url, &["sessions", tenant.as_str()]),
            token: self.token.clone(),
            tenant: tenant.clone(),
            auth_dir: credential_dir.to_path_buf(),
            webhook_url: join_segments(&self.webhook_base_url, &["webhook", "bridge", tenant.as_str()]),
            events,
            router: self.router.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn factory(server: &MockServer, token: Option<&str>) -> BridgeClientFactory {
        let config = BridgeConfig {
            base_url: format!("{}/", server.uri()),
            token: token.map(str::to_string),
            webhook_base_url: "http://gateway:3000".to_string(),
        };
        BridgeClientFactory::new(&config, EventRouter::new()).unwrap()
    }

    fn client(factory: &BridgeClientFactory) -> Arc<dyn WhatsAppClient> {
        let (tx, _rx) = mpsc::unbounded_channel();
        factory.create(&TenantId::from("acme"), Path::new("/auth/session-acme"), tx)
    }

    #[test]
    fn test_invalid_base_url() {
        let config = BridgeConfig {
            base_url: "mailto:bridge@example.com".to_string(),
            token: None,
            webhook_base_url: "http://gateway:3000".to_string(),
        };
        assert!(matches!(
            BridgeClientFactory::new(&config, EventRouter::new()),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_tenant_is_one_path_segment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions/a%2Fb/start"))
            .and(body_json(serde_json::json!({
                "auth_dir": "/auth/session-a_2Fb",
                "webhook": "http://gateway:3000/webhook/bridge/a%2Fb"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/sessions/a%2Fb"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let client = factory(&server, None).create(
            &TenantId::from("a/b"),
            Path::new("/auth/session-a_2Fb"),
            tx,
        );
        tokio_test::assert_ok!(client.initialize().await);
        tokio_test::assert_ok!(client.destroy().await);
    }

    #[tokio::test]
    async fn test_initialize_registers_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions/acme/start"))
            .and(header("authorization", "Bearer t0k"))
            .and(body_json(serde_json::json!({
                "auth_dir": "/auth/session-acme",
                "webhook": "http://gateway:3000/webhook/bridge/acme"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let factory = factory(&server, Some("t0k"));
        tokio_test::assert_ok!(client(&factory).initialize().await);
    }

    #[tokio::test]
    async fn test_initialize_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions/acme/start"))
            .respond_with(ResponseTemplate::new(500).set_body_string("chromium crashed"))
            .mount(&server)
            .await;

        let err = client(&factory(&server, None)).initialize().await.unwrap_err();
        assert!(matches!(err, TransportError::Api(msg) if msg.contains("chromium crashed")));
    }

    #[tokio::test]
    async fn test_send_text_with_quote() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions/acme/messages"))
            .and(body_json(serde_json::json!({
                "to": "5511@c.us",
                "body": "Welcome",
                "quoted_message_id": "m1"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&factory(&server, None))
            .send_text(&ChatId::from("5511@c.us"), "Welcome", Some("m1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_text_classifies_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions/acme/messages"))
            .respond_with(
                ResponseTemplate::new(500).set_body_string("Error: Could not get the quoted message"),
            )
            .mount(&server)
            .await;

        let err = client(&factory(&server, None))
            .send_text(&ChatId::from("5511@c.us"), "Welcome", Some("m1"))
            .await
            .unwrap_err();
        assert_eq!(err, SendError::QuotedMessageGone);
    }

    #[tokio::test]
    async fn test_destroy_not_supported() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/sessions/acme"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sessions/acme/logout"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&factory(&server, None));
        assert_eq!(client.destroy().await, Err(TransportError::Unsupported));
        tokio_test::assert_ok!(client.logout().await);
    }

    #[tokio::test]
    async fn test_drop_unregisters_channel() {
        let server = MockServer::start().await;
        let factory = factory(&server, None);
        let tenant = TenantId::from("acme");

        let client = client(&factory);
        assert!(factory.router().is_registered(&tenant));

        drop(client);
        assert!(!factory.router().is_registered(&tenant));
    }
}
