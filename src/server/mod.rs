//! HTTP surface of the relay.

pub mod chat;
pub mod error;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::core::config::Config;
use crate::core::upstream::{CompletionClient, OpenAiCompatibleClient};

pub const CHAT_PATH: &str = "/api/chat";
pub const HEALTH_PATH: &str = "/health";

#[derive(Clone)]
pub struct AppState {
    pub client: Arc<dyn CompletionClient>,
    /// Ceiling for one request, measured from arrival.
    pub max_duration: Duration,
}

impl AppState {
    pub fn new(client: Arc<dyn CompletionClient>, max_duration: Duration) -> Self {
        Self {
            client,
            max_duration,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(CHAT_PATH, post(chat::chat))
        .route(HEALTH_PATH, get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// Binds `server.listen_addr` and serves until Ctrl-C.
pub async fn serve(config: &Config) -> Result<(), Box<dyn Error>> {
    let addr = config.server.socket_addr()?;
    let client = OpenAiCompatibleClient::new(reqwest::Client::new(), config.provider.clone());
    let state = AppState::new(Arc::new(client), config.server.max_duration());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        %addr,
        model = %config.provider.model,
        upstream = %config.provider.completions_url(),
        "relay listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
