use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{ApiMessage, RelayRequest};
use crate::core::consumer::{consume_relay_stream, ConsumeOutcome, StreamMessage, StreamSender};

pub struct StreamParams {
    pub client: reqwest::Client,
    pub endpoint: String,
    pub history: Vec<ApiMessage>,
    pub cancel_token: CancellationToken,
    pub stream_id: u64,
}

/// Posts conversation history to the relay and forwards what the consumer
/// reads back as `(StreamMessage, stream_id)` pairs.
#[derive(Clone)]
pub struct ChatStreamService {
    tx: StreamSender,
}

impl ChatStreamService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamMessage, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn_stream(&self, params: StreamParams) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let StreamParams {
                client,
                endpoint,
                history,
                cancel_token,
                stream_id,
            } = params;

            tokio::select! {
                outcome = run_stream(client, endpoint, history, &tx, stream_id) => {
                    if let Some(outcome) = outcome {
                        debug!(
                            stream_id,
                            chunks = outcome.chunks,
                            saw_done = outcome.saw_done,
                            failed = outcome.failed,
                            "relay stream finished"
                        );
                    }
                }
                _ = cancel_token.cancelled() => {
                    debug!(stream_id, "stream cancelled");
                }
            }
        });
    }

    #[cfg(test)]
    pub fn send_for_test(&self, message: StreamMessage, stream_id: u64) {
        let _ = self.tx.send((message, stream_id));
    }
}

/// Returns `None` when the relay was never reached or rejected the request.
async fn run_stream(
    client: reqwest::Client,
    endpoint: String,
    history: Vec<ApiMessage>,
    tx: &StreamSender,
    stream_id: u64,
) -> Option<ConsumeOutcome> {
    let request = RelayRequest { messages: history };
    debug!(stream_id, messages = request.messages.len(), %endpoint, "posting chat request");

    let response = match client.post(&endpoint).json(&request).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(stream_id, error = %e, "chat request failed");
            let _ = tx.send((StreamMessage::Error(e.to_string()), stream_id));
            return None;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(stream_id, %status, %body, "relay rejected chat request");
        let _ = tx.send((
            StreamMessage::Error(format!("Failed to get response ({status})")),
            stream_id,
        ));
        return None;
    }

    let _ = tx.send((StreamMessage::Opened, stream_id));
    Some(consume_relay_stream(response.bytes_stream(), tx, stream_id).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;

    async fn local_relay(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await });
        format!("http://{addr}/api/chat")
    }

    #[tokio::test]
    async fn completed_read_reports_chunks_and_sentinel() {
        let endpoint = local_relay(Router::new().route(
            "/api/chat",
            post(|| async { "data: {\"content\":\"Hel\"}\n\ndata: {\"content\":\"lo!\"}\n\ndata: [DONE]\n\n" }),
        ))
        .await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let outcome = run_stream(reqwest::Client::new(), endpoint, vec![ApiMessage::user("hi")], &tx, 3)
            .await
            .expect("relay reached");

        assert_eq!(
            outcome,
            ConsumeOutcome {
                chunks: 2,
                saw_done: true,
                failed: false,
            }
        );
        assert_eq!(rx.recv().await, Some((StreamMessage::Opened, 3)));
    }

    #[tokio::test]
    async fn rejected_request_has_no_outcome() {
        let endpoint = local_relay(Router::new().route(
            "/api/chat",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        ))
        .await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let outcome = run_stream(reqwest::Client::new(), endpoint, vec![ApiMessage::user("hi")], &tx, 4).await;

        assert!(outcome.is_none());
        let (message, _) = rx.recv().await.expect("error message");
        assert_eq!(message, StreamMessage::Error("Failed to get response (500 Internal Server Error)".into()));
    }

    #[tokio::test]
    async fn unreachable_relay_reports_an_error() {
        let (service, mut rx) = ChatStreamService::new();
        service.spawn_stream(StreamParams {
            client: reqwest::Client::new(),
            // Port 9 (discard) on localhost is not expected to accept HTTP.
            endpoint: "http://127.0.0.1:9/api/chat".to_string(),
            history: vec![ApiMessage::user("hi")],
            cancel_token: CancellationToken::new(),
            stream_id: 5,
        });

        let (message, stream_id) = rx.recv().await.expect("stream message");
        assert_eq!(stream_id, 5);
        assert!(matches!(message, StreamMessage::Error(_)));
    }

    #[tokio::test]
    async fn cancelled_stream_leaves_channel_usable() {
        let (service, mut rx) = ChatStreamService::new();
        let cancel_token = CancellationToken::new();
        cancel_token.cancel();

        service.spawn_stream(StreamParams {
            client: reqwest::Client::new(),
            endpoint: "http://127.0.0.1:9/api/chat".to_string(),
            history: vec![ApiMessage::user("hi")],
            cancel_token,
            stream_id: 6,
        });
        service.send_for_test(StreamMessage::End, 99);

        let (message, stream_id) = rx.recv().await.expect("test message");
        assert_eq!((message, stream_id), (StreamMessage::End, 99));
    }
}
