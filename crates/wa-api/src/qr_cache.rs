//! Latest pairing code per tenant
//!
//! Lifecycle events are at-most-once, so a client that opens the QR page
//! after the code was issued would otherwise never see it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use qrcode::QrCode;
use qrcode::render::svg;
use qrcode::types::QrError;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use wa_core::{EventNotifier, LifecycleEvent, TenantId};

/// Smallest edge of a rendered pairing code, in pixels
const MIN_IMAGE_SIZE: u32 = 256;

/// A pairing code waiting to be scanned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingCode {
    pub tenant: TenantId,
    pub payload: String,
    pub issued_at: DateTime<Utc>,
}

impl PairingCode {
    /// Render the payload as a scannable SVG document
    pub fn to_svg(&self) -> Result<String, QrError> {
        let code = QrCode::new(self.payload.as_bytes())?;
        Ok(code
            .render::<svg::Color>()
            .min_dimensions(MIN_IMAGE_SIZE, MIN_IMAGE_SIZE)
            .build())
    }
}

#[derive(Clone, Default)]
pub struct QrCache {
    codes: Arc<DashMap<TenantId, PairingCode>>,
}

impl QrCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the cache in sync with the notifier until it closes
    pub fn spawn(&self, notifier: &EventNotifier) -> JoinHandle<()> {
        let cache = self.clone();
        let rx = notifier.subscribe();
        tokio::spawn(async move { cache.run(rx).await })
    }

    async fn run(&self, mut rx: broadcast::Receiver<LifecycleEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => self.apply(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "QR cache lagged behind lifecycle events");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("QR cache stopped");
    }

    pub fn apply(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::QrCodeCreated { tenant, payload } => {
                self.codes.insert(
                    tenant.clone(),
                    PairingCode {
                        tenant: tenant.clone(),
                        payload: payload.clone(),
                        issued_at: Utc::now(),
                    },
                );
            }
            LifecycleEvent::ClientReady { tenant } | LifecycleEvent::ClientDisconnected { tenant } => {
                self.codes.remove(tenant);
            }
        }
    }

    pub fn get(&self, tenant: &TenantId) -> Option<PairingCode> {
        self.codes.get(tenant).map(|c| c.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_latest_code_wins_until_ready() {
        let cache = QrCache::new();
        let tenant = TenantId::from("acme");

        cache.apply(&LifecycleEvent::QrCodeCreated {
            tenant: tenant.clone(),
            payload: "2@first".into(),
        });
        cache.apply(&LifecycleEvent::QrCodeCreated {
            tenant: tenant.clone(),
            payload: "2@second".into(),
        });
        assert_eq!(cache.get(&tenant).unwrap().payload, "2@second");

        cache.apply(&LifecycleEvent::ClientReady { tenant: tenant.clone() });
        assert!(cache.get(&tenant).is_none());
    }

    #[test]
    fn test_renders_svg() {
        let code = PairingCode {
            tenant: TenantId::from("acme"),
            payload: "2@abc,def,ghi==".to_string(),
            issued_at: Utc::now(),
        };

        let svg = code.to_svg().unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("</svg>"));
    }

    #[test]
    fn test_oversized_payload_fails_to_render() {
        let code = PairingCode {
            tenant: TenantId::from("acme"),
            payload: "x".repeat(8000),
            issued_at: Utc::now(),
        };
        assert!(code.to_svg().is_err());
    }

    #[tokio::test]
    async fn test_follows_notifier() {
        let notifier = EventNotifier::new(16);
        let cache = QrCache::new();
        let _task = cache.spawn(&notifier);
        let tenant = TenantId::from("acme");

        notifier.qr_code_created(&tenant, "2@abc".to_string());
        for _ in 0..100 {
            if cache.get(&tenant).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cache.get(&tenant).unwrap().payload, "2@abc");

        notifier.client_disconnected(&tenant);
        for _ in 0..100 {
            if cache.get(&tenant).is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(cache.get(&tenant).is_none());
    }
}
