//! HTTP and WebSocket front end.
//!
//! One listener serves `POST /query`, `GET /health` and the device channel.
//! Every HTTP response allows any origin; `OPTIONS` preflights are answered
//! directly.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_REQUEST_HEADERS,
};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, info};

use q2d_core::constants::{DEFAULT_API_KEY, DEFAULT_PORT, DEFAULT_WS_PATH};
use q2d_core::{Error, QueryStore, Result};

use crate::dispatch::CommandDispatcher;
use crate::gateway::{QueryGateway, QueryRequest, respond_then_dispatch};
use crate::link::{DeviceLink, LinkConfig};

const ALLOWED_METHODS: &str = "GET,HEAD,PUT,PATCH,POST,DELETE";

/// Routes served alongside the device channel.
pub(crate) const RESERVED_PATHS: [&str; 2] = ["/query", "/health"];

/// Check that `ws_path` can be routed next to the HTTP endpoints.
pub(crate) fn check_ws_path(ws_path: &str) -> std::result::Result<(), String> {
    if !ws_path.starts_with('/') {
        return Err(format!("ws path must start with '/', got {ws_path:?}"));
    }
    if RESERVED_PATHS.contains(&ws_path) {
        return Err(format!("ws path {ws_path} collides with an HTTP route"));
    }
    Ok(())
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub api_key: String,
    pub ws_path: String,
    pub link: LinkConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            api_key: DEFAULT_API_KEY.to_string(),
            ws_path: DEFAULT_WS_PATH.to_string(),
            link: LinkConfig::default(),
        }
    }
}

#[derive(Clone)]
struct AppState {
    gateway: QueryGateway,
    link: DeviceLink,
}

/// A bound server, ready to run.
pub struct Server {
    listener: TcpListener,
    router: Router,
    link: DeviceLink,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind the listener and spawn the device link.
    pub async fn bind(config: ServerConfig, store: Arc<dyn QueryStore>) -> Result<Self> {
        check_ws_path(&config.ws_path).map_err(|message| Error::Config { message })?;

        let link = DeviceLink::new(config.link.clone());
        let gateway = QueryGateway::new(
            store,
            config.api_key.clone(),
            CommandDispatcher::new(link.clone()),
        );
        let router = router(
            AppState {
                gateway,
                link: link.clone(),
            },
            &config.ws_path,
        );

        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            ws_path = %config.ws_path,
            heartbeat_secs = config.link.heartbeat_interval.as_secs_f64(),
            "Server listening"
        );

        Ok(Self {
            listener,
            router,
            link,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle to the device slot.
    pub fn link(&self) -> DeviceLink {
        self.link.clone()
    }

    /// Serve until `shutdown` resolves, then close the device connection.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let link = self.link.clone();
        axum::serve(
            self.listener,
            self.router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Shutting down");
            link.shutdown();
        })
        .await?;
        Ok(())
    }
}

fn router(state: AppState, ws_path: &str) -> Router {
    Router::new()
        .route("/query", post(query))
        .route("/health", get(health))
        .route(ws_path, get(device_channel))
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

async fn query(State(state): State<AppState>, body: Bytes) -> Response {
    match state.gateway.execute(QueryRequest::from_body(&body)).await {
        Ok((response, pending)) => respond_then_dispatch(&response, pending),
        Err(e) => e.into_response(),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn device_channel(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    debug!(%peer, "Device channel upgrade");
    ws.on_upgrade(move |socket| async move {
        state.link.serve(socket, peer).await;
    })
}

async fn cors(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let allow_headers = request
            .headers()
            .get(ACCESS_CONTROL_REQUEST_HEADERS)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("*"));
        let mut response = StatusCode::NO_CONTENT.into_response();
        let headers = response.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, allow_headers);
        return response;
    }

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}
