use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use futures_util::Stream;
use std::convert::Infallible;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::api::RelayRequest;
use crate::core::relay::spawn_relay;
use crate::core::upstream::UpstreamError;
use crate::server::error::ApiError;
use crate::server::AppState;

/// `POST /api/chat`: relays one completion for the posted history.
pub async fn chat(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let started = Instant::now();
    let request = parse_chat_request(&body)?;
    info!(messages = request.messages.len(), "chat request received");

    let opened = tokio::time::timeout_at(
        started + state.max_duration,
        state.client.stream_completion(&request.messages),
    )
    .await
    .unwrap_or(Err(UpstreamError::Timeout(state.max_duration)));

    let fragments = opened.map_err(|err| {
        warn!(error = %err, "failed to open upstream stream");
        ApiError::Transport(err.to_string())
    })?;

    Ok(sse_response(spawn_relay(
        fragments,
        started,
        state.max_duration,
    )))
}

pub fn parse_chat_request(body: &[u8]) -> Result<RelayRequest, ApiError> {
    let request: RelayRequest =
        serde_json::from_slice(body).map_err(|e| ApiError::Validation(e.to_string()))?;
    if request.messages.is_empty() {
        return Err(ApiError::Validation(
            "messages must contain at least one entry".to_string(),
        ));
    }
    Ok(request)
}

pub fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    (headers, Body::from_stream(stream)).into_response()
}
