//! Viewer bootstrap page
//!
//! Serves the embedded viewer page and its script. The script carries the
//! signaling port and ICE server in two known lines that are rewritten per
//! request from the streamer configuration.

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use rust_embed::Embed;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::{AppError, Result};

/// Embedded viewer assets
#[derive(Embed)]
#[folder = "web/bootstrap"]
pub struct BootstrapAssets;

const WS_URL_PLACEHOLDER: &str =
    "const wsUrl = 'ws://' + window.location.hostname + ':8001/' + clientId;";
const ICE_PLACEHOLDER: &str = "iceServers: [{ urls: ['stun:stun.l.google.com:19302'] }]";

const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Values substituted into the viewer script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapPage {
    pub signaling_port: u16,
    /// Empty for host candidates only
    pub ice_server: String,
}

impl BootstrapPage {
    pub fn new(signaling_port: u16, ice_server: impl Into<String>) -> Self {
        Self {
            signaling_port,
            ice_server: ice_server.into(),
        }
    }

    /// Viewer script with both placeholders rewritten
    pub fn render_script(&self, template: &str) -> String {
        let ws_url = format!(
            "const wsUrl = 'ws://' + window.location.hostname + ':{}/' + clientId;",
            self.signaling_port
        );
        let ice = if self.ice_server.trim().is_empty() {
            "iceServers: []".to_string()
        } else {
            format!("iceServers: [{{ urls: ['{}'] }}]", self.ice_server.trim())
        };

        template
            .replace(WS_URL_PLACEHOLDER, &ws_url)
            .replace(ICE_PLACEHOLDER, &ice)
    }
}

fn asset_response(path: &str, body: Body) -> Response {
    let mime = mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string();
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        body,
    )
        .into_response()
}

fn serve_asset(path: &str) -> Response {
    match BootstrapAssets::get(path) {
        Some(asset) => asset_response(path, Body::from(asset.data.into_owned())),
        None => (StatusCode::NOT_FOUND, "Not Found").into_response(),
    }
}

async fn index_handler() -> Response {
    serve_asset("index.html")
}

async fn client_script_handler(State(page): State<Arc<BootstrapPage>>) -> Response {
    let Some(asset) = BootstrapAssets::get("client.js") else {
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    };
    let template = String::from_utf8_lossy(&asset.data);
    asset_response("client.js", Body::from(page.render_script(&template)))
}

/// Routes for the viewer page
pub fn bootstrap_router(page: BootstrapPage) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/index.html", get(index_handler))
        .route("/client.js", get(client_script_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(page))
}

/// Running bootstrap HTTP responder
pub struct BootstrapServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl BootstrapServer {
    /// Bind `ip:port` and serve the viewer page; bind failure is a `RuntimeError`
    pub async fn start(ip: &str, port: u16, page: BootstrapPage) -> Result<Self> {
        let listener = TcpListener::bind((ip, port)).await.map_err(|e| {
            AppError::RuntimeError(format!(
                "Failed to bind HTTP server on {}:{}: {}",
                ip, port, e
            ))
        })?;
        let addr = listener.local_addr()?;

        let app = bootstrap_router(page);
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                warn!("HTTP server exited with error: {}", e);
            }
        });

        info!("HTTP server listening on http://{}", addr);
        Ok(Self {
            addr,
            shutdown,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let mut handle = self.handle;
        if tokio::time::timeout(STOP_TIMEOUT, &mut handle).await.is_err() {
            warn!("HTTP server did not stop in time, aborting");
            handle.abort();
        }
        info!("HTTP server on {} stopped", self.addr);
    }
}
