//! HTTP/WebSocket front end.
//!
//! `/ws` carries the event protocol; a handful of JSON endpoints expose the
//! roster, name availability and health.

use std::future::Future;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::lobby::Lobby;
use crate::ratelimit::RateLimitConfig;
use crate::sweeper::spawn_sweeper;

/// Game session server
pub struct Server {
    config: ServerConfig,
    lobby: Arc<Lobby>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let lobby = Arc::new(Lobby::new(config.clone())?);
        Ok(Self { config, lobby })
    }

    pub fn lobby(&self) -> &Arc<Lobby> {
        &self.lobby
    }

    pub fn router(&self) -> Router {
        router(self.lobby.clone())
    }

    /// Bind the configured address and serve until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(addr = %listener.local_addr()?, "Broadside listening");
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `shutdown` resolves.
    pub async fn serve(self, listener: TcpListener, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let sweeper = spawn_sweeper(self.lobby.clone(), self.config.sweep_interval, stop_rx);

        let app = self.router();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        let _ = stop_tx.send(true);
        if let Err(e) = sweeper.await {
            warn!(error = %e, "Sweeper task failed");
        }
        info!("Broadside stopped");
        Ok(served?)
    }
}

/// Server builder for configuration
pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Start from an existing configuration.
    pub fn from_config(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_addr = addr.into();
        self
    }

    pub fn invite_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.config.invite_ttl = ttl;
        self
    }

    pub fn game_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.config.game_ttl = ttl;
        self
    }

    pub fn user_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.config.user_ttl = ttl;
        self
    }

    pub fn sweep_interval(mut self, interval: std::time::Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    pub fn rate_limit(mut self, limit: RateLimitConfig) -> Self {
        self.config.rate_limit = limit;
        self
    }

    pub fn build(self) -> Result<Server> {
        Server::new(self.config)
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== Routes ====================

pub fn router(lobby: Arc<Lobby>) -> Router {
    let router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/users/online", get(online_users))
        .route("/api/users/online", get(online_users))
        .route("/api/users/check/:username", get(check_username));

    #[cfg(feature = "metrics")]
    let router = router.route("/metrics", get(metrics));

    router.layer(CorsLayer::permissive()).with_state(lobby)
}

async fn ws_handler(ws: WebSocketUpgrade, State(lobby): State<Arc<Lobby>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, lobby))
}

/// One task per connection. Frames are handled in arrival order and each
/// runs to completion before the next is read.
async fn handle_socket(mut socket: WebSocket, lobby: Arc<Lobby>) {
    let (conn, mut mailbox) = lobby.connect();

    loop {
        tokio::select! {
            Some(event) = mailbox.recv() => {
                let text = match event.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(conn = %conn, error = %e, "Failed to encode event");
                        continue;
                    }
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => lobby.handle_text(conn, &text),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(conn = %conn, error = %e, "Socket error");
                        break;
                    }
                }
            }
        }
    }

    lobby.disconnect(conn);
}

async fn health(State(lobby): State<Arc<Lobby>>) -> Json<serde_json::Value> {
    let stats = lobby.stats();
    Json(json!({
        "status": "ok",
        "connections": stats.connections,
        "usersOnline": stats.users_online,
        "gamesActive": stats.games_active,
    }))
}

async fn online_users(State(lobby): State<Arc<Lobby>>) -> Response {
    match lobby.presence().list_online() {
        Ok(users) => Json(json!({
            "success": true,
            "count": users.len(),
            "users": users,
        }))
        .into_response(),
        Err(e) => unavailable(&e),
    }
}

async fn check_username(State(lobby): State<Arc<Lobby>>, Path(username): Path<String>) -> Response {
    match lobby.presence().check_availability(&username) {
        Ok(availability) => Json(json!({
            "success": true,
            "available": availability.available,
            "message": availability.message,
        }))
        .into_response(),
        Err(e) => unavailable(&e),
    }
}

#[cfg(feature = "metrics")]
async fn metrics(State(lobby): State<Arc<Lobby>>) -> String {
    lobby.render_metrics()
}

fn unavailable(error: &dyn std::fmt::Display) -> Response {
    warn!(error = %error, "Request failed");
    (
        axum::http::StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "success": false, "message": "Storage unavailable" })),
    )
        .into_response()
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
