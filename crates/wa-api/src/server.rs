//! HTTP API Server
//!
//! Starts and manages the axum-based HTTP server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use http::{HeaderValue, Method, header};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use wa_bot::SessionManager;
use wa_core::ApiConfig;

use crate::qr_cache::QrCache;
use crate::routes::routes;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub qr_cache: QrCache,
}

impl AppState {
    pub fn new(manager: Arc<SessionManager>, qr_cache: QrCache) -> Self {
        Self { manager, qr_cache }
    }
}

fn cors_layer(allowed_origins: Option<&[String]>) -> CorsLayer {
    let origin = match allowed_origins {
        Some(origins) => {
            let parsed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| match HeaderValue::from_str(o) {
                    Ok(v) => Some(v),
                    Err(_) => {
                        warn!(origin = %o, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(parsed)
        }
        None => AllowOrigin::any(),
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Build the application router
///
/// `extra` is merged as-is; it carries its own state (the bridge webhook).
pub fn app(state: AppState, config: &ApiConfig, extra: Router) -> Router {
    Router::new()
        .merge(routes())
        .with_state(state)
        .merge(extra)
        .layer(cors_layer(config.allowed_origins.as_deref()))
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP API server and run until `shutdown` resolves
pub async fn start_server<F>(config: &ApiConfig, app: Router, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("HTTP API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
