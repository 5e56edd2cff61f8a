//! Streaming completion requests against an OpenAI-compatible provider.
//!
//! [`CompletionClient::stream_completion`] resolves once the provider has
//! accepted the request. Anything that fails up to that point is a failure
//! "before streaming begins"; afterwards failures arrive as items of the
//! returned [`FragmentStream`], after zero or more valid fragments.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use memchr::memchr;
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::{ApiMessage, ChatRequest, ChatResponse};
use crate::core::config::ProviderConfig;

/// Lazy, finite, non-restartable sequence of reply fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, UpstreamError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    Network(String),
    Authentication(String),
    Status { status: u16, message: String },
    /// The provider sent bytes that are not valid stream framing.
    Framing(String),
    /// The provider reported an error inside the stream.
    Provider(String),
    Timeout(Duration),
}

impl UpstreamError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = summarize_error_body(body);
        match status {
            401 | 403 => UpstreamError::Authentication(message),
            _ => UpstreamError::Status { status, message },
        }
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::Network(msg) => write!(f, "network error: {msg}"),
            UpstreamError::Authentication(msg) => write!(f, "authentication failed: {msg}"),
            UpstreamError::Status { status, message } => {
                write!(f, "provider returned status {status}: {message}")
            }
            UpstreamError::Framing(msg) => write!(f, "malformed provider stream: {msg}"),
            UpstreamError::Provider(msg) => write!(f, "provider error: {msg}"),
            UpstreamError::Timeout(limit) => {
                write!(f, "response exceeded {}s limit", limit.as_secs())
            }
        }
    }
}

impl std::error::Error for UpstreamError {}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn stream_completion(
        &self,
        history: &[ApiMessage],
    ) -> Result<FragmentStream, UpstreamError>;
}

pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    provider: ProviderConfig,
}

impl OpenAiCompatibleClient {
    pub fn new(http: reqwest::Client, provider: ProviderConfig) -> Self {
        Self { http, provider }
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatibleClient {
    async fn stream_completion(
        &self,
        history: &[ApiMessage],
    ) -> Result<FragmentStream, UpstreamError> {
        let api_key = self.provider.api_key().ok_or_else(|| {
            UpstreamError::Authentication(format!(
                "no API key found in {}",
                self.provider.api_key_env
            ))
        })?;

        let request = ChatRequest {
            model: &self.provider.model,
            messages: history,
            stream: true,
        };

        debug!(
            model = %self.provider.model,
            messages = history.len(),
            "opening upstream completion stream"
        );

        let response = self
            .http
            .post(self.provider.completions_url())
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {api_key}"))
            .header("HTTP-Referer", &self.provider.referer)
            .header("X-Title", &self.provider.title)
            .json(&request)
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(UpstreamError::from_status(status.as_u16(), &body));
        }

        Ok(fragments_from_sse(response.bytes_stream()))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Fragment(String),
    Done,
    Skip,
}

/// Turns a provider SSE body into fragments. Lines may be split across
/// reads; only complete lines are interpreted.
pub fn fragments_from_sse<S, E>(body: S) -> FragmentStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        futures_util::pin_mut!(body);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(UpstreamError::Network(e.to_string()));
                    return;
                }
            };
            buffer.extend_from_slice(&chunk);

            while let Some(newline_pos) = memchr(b'\n', &buffer) {
                let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
                match parse_sse_line(&line) {
                    Ok(SseLine::Fragment(text)) => yield Ok(text),
                    Ok(SseLine::Done) => return,
                    Ok(SseLine::Skip) => {}
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }
        }

        if !buffer.is_empty() {
            match parse_sse_line(&buffer) {
                Ok(SseLine::Fragment(text)) => yield Ok(text),
                Ok(_) => {}
                Err(err) => yield Err(err),
            }
        }
    })
}

fn parse_sse_line(line: &[u8]) -> Result<SseLine, UpstreamError> {
    let line = match std::str::from_utf8(line) {
        Ok(s) => s.trim(),
        Err(e) => {
            warn!(error = %e, "skipping invalid UTF-8 in provider stream");
            return Ok(SseLine::Skip);
        }
    };

    let Some(payload) = line.strip_prefix("data:").map(str::trim_start) else {
        return Ok(SseLine::Skip);
    };

    if payload == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if payload.is_empty() {
        return Ok(SseLine::Skip);
    }

    let value: Value = serde_json::from_str(payload)
        .map_err(|_| UpstreamError::Framing(truncate_for_log(payload)))?;

    if value.get("error").is_some() {
        let summary = extract_error_summary(&value).unwrap_or_else(|| value.to_string());
        return Err(UpstreamError::Provider(summary));
    }

    let response: ChatResponse =
        serde_json::from_value(value).map_err(|e| UpstreamError::Framing(e.to_string()))?;

    Ok(response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .map(SseLine::Fragment)
        .unwrap_or(SseLine::Skip))
}

fn extract_error_summary(value: &Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn summarize_error_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    serde_json::from_str::<Value>(trimmed)
        .ok()
        .and_then(|value| extract_error_summary(&value))
        .filter(|summary| !summary.is_empty())
        .unwrap_or_else(|| truncate_for_log(trimmed))
}

fn truncate_for_log(text: &str) -> String {
    const LIMIT: usize = 200;
    match text.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::convert::Infallible;

    fn body(chunks: &[&str]) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        let owned: Vec<Result<Bytes, Infallible>> = chunks
            .iter()
            .map(|chunk| Ok(Bytes::from(chunk.to_string())))
            .collect();
        stream::iter(owned)
    }

    async fn collect(fragments: FragmentStream) -> Vec<Result<String, UpstreamError>> {
        fragments.collect().await
    }

    #[tokio::test]
    async fn fragments_survive_reads_split_mid_line() {
        let stream = fragments_from_sse(body(&[
            ": OPENROUTER PROCESSING\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi",
            "ces\":[{\"delta\":{\"content\":\"lo!\"}}]}\n\n",
            "data: [DONE]\n\n",
        ]));

        let items = collect(stream).await;
        assert_eq!(items, vec![Ok("Hel".to_string()), Ok("lo!".to_string())]);
    }

    #[tokio::test]
    async fn done_stops_reading_further_lines() {
        let stream = fragments_from_sse(body(&[
            "data:{\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
            "data:[DONE]\n",
            "data:{\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n",
        ]));

        assert_eq!(collect(stream).await, vec![Ok("a".to_string())]);
    }

    #[tokio::test]
    async fn role_only_deltas_are_skipped() {
        let stream = fragments_from_sse(body(&[
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n",
            "data: {\"choices\":[]}\n",
        ]));

        assert!(collect(stream).await.is_empty());
    }

    #[tokio::test]
    async fn in_stream_error_payload_fails_after_partial_output() {
        let stream = fragments_from_sse(body(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n",
            "data: {\"error\":{\"message\":\"model   overloaded\"}}\n",
        ]));

        let items = collect(stream).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok("partial".to_string()));
        assert_eq!(
            items[1],
            Err(UpstreamError::Provider("model overloaded".to_string()))
        );
    }

    #[tokio::test]
    async fn non_json_payload_is_a_framing_error() {
        let items = collect(fragments_from_sse(body(&["data: <html>\n"]))).await;
        assert!(matches!(items.as_slice(), [Err(UpstreamError::Framing(_))]));
    }

    #[tokio::test]
    async fn body_read_failure_is_a_network_error() {
        let failing = stream::iter(vec![
            Ok(Bytes::from("data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n")),
            Err("connection reset"),
        ]);

        let items = collect(fragments_from_sse(failing)).await;
        assert_eq!(items[0], Ok("x".to_string()));
        assert_eq!(
            items[1],
            Err(UpstreamError::Network("connection reset".to_string()))
        );
    }

    #[tokio::test]
    async fn trailing_line_without_newline_is_parsed() {
        let stream = fragments_from_sse(body(&["data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}"]));
        assert_eq!(collect(stream).await, vec![Ok("tail".to_string())]);
    }

    #[test]
    fn status_errors_are_summarized() {
        let auth = UpstreamError::from_status(401, r#"{"error":{"message":"No auth credentials found"}}"#);
        assert_eq!(
            auth,
            UpstreamError::Authentication("No auth credentials found".to_string())
        );

        let other = UpstreamError::from_status(502, "bad gateway");
        assert_eq!(
            other.to_string(),
            "provider returned status 502: bad gateway"
        );
    }

    #[tokio::test]
    async fn missing_api_key_is_an_authentication_failure() {
        let provider = ProviderConfig {
            api_key_env: "RELAYCHAT_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..ProviderConfig::default()
        };
        let client = OpenAiCompatibleClient::new(reqwest::Client::new(), provider);

        let result = client.stream_completion(&[ApiMessage::user("hi")]).await;
        assert!(matches!(result, Err(UpstreamError::Authentication(_))));
    }
}
