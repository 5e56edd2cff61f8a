//! Payloads exchanged with the upstream provider and with the relay endpoint.

use serde::{Deserialize, Serialize};

use crate::core::message::Role;

/// One turn of conversation history as sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiMessage {
    pub role: Role,
    pub content: String,
}

impl ApiMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Body accepted by `POST /api/chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayRequest {
    pub messages: Vec<ApiMessage>,
}

/// Content event carried on a `data:` line of the relay stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEvent {
    pub content: String,
}

/// Structured error body returned by the relay endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub details: String,
}

#[derive(Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ApiMessage],
    pub stream: bool,
}

#[derive(Deserialize)]
pub struct ChatResponseDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatResponseChoice {
    pub delta: ChatResponseDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatResponseChoice>,
}
