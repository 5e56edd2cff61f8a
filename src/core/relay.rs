//! Converts an upstream fragment sequence into the relay wire protocol.
//!
//! Whatever happens upstream, the output ends with exactly one `[DONE]`
//! sentinel. Upstream failures and empty replies are turned into displayable
//! content events instead of being propagated to the transport.

use std::convert::Infallible;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::upstream::{FragmentStream, UpstreamError};
use crate::core::wire::{done_event, encode_content_event};

pub const NO_CONTENT_FALLBACK: &str = "No response from AI model. Please try again.";
pub const STREAM_ERROR_MESSAGE: &str = "Error in streaming response.";

/// Capacity of the channel between the encoder task and the response body.
pub const RELAY_BUFFER: usize = 16;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Non-empty fragments forwarded to the client.
    pub fragments: usize,
    pub fallback_used: bool,
    pub upstream_error: Option<UpstreamError>,
    pub client_disconnected: bool,
    /// The ceiling expired, either upstream or while waiting on the client.
    pub timed_out: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    Disconnected,
    /// The client stopped reading and the deadline passed.
    TimedOut,
}

/// Outbound half of the relay. The sentinel is written by [`RelaySink::finish`]
/// or, if the encoder never gets there, when the sink is dropped. The drop path
/// is best effort: with a full channel the sentinel is skipped and the body
/// simply ends once the sender is gone.
struct RelaySink {
    tx: mpsc::Sender<Bytes>,
    deadline: Instant,
    done_sent: bool,
}

impl RelaySink {
    fn new(tx: mpsc::Sender<Bytes>, deadline: Instant) -> Self {
        Self {
            tx,
            deadline,
            done_sent: false,
        }
    }

    /// Writes immediately when the channel has room, otherwise waits for room
    /// until the deadline.
    async fn send(&mut self, chunk: Bytes) -> Delivery {
        let chunk = match self.tx.try_send(chunk) {
            Ok(()) => return Delivery::Sent,
            Err(TrySendError::Closed(_)) => return Delivery::Disconnected,
            Err(TrySendError::Full(chunk)) => chunk,
        };

        match tokio::time::timeout_at(self.deadline, self.tx.send(chunk)).await {
            Ok(Ok(())) => Delivery::Sent,
            Ok(Err(_)) => Delivery::Disconnected,
            Err(_) => Delivery::TimedOut,
        }
    }

    async fn finish(mut self) -> Delivery {
        self.done_sent = true;
        self.send(done_event()).await
    }
}

impl Drop for RelaySink {
    fn drop(&mut self) {
        if !self.done_sent {
            self.done_sent = true;
            let _ = self.tx.try_send(done_event());
        }
    }
}

impl RelayOutcome {
    /// Records a failed delivery. Returns true when the pump must stop.
    fn stop_on(&mut self, delivery: Delivery, max_duration: Duration) -> bool {
        match delivery {
            Delivery::Sent => false,
            Delivery::Disconnected => {
                debug!(fragments = self.fragments, "client disconnected mid-stream");
                self.client_disconnected = true;
                true
            }
            Delivery::TimedOut => {
                warn!(
                    fragments = self.fragments,
                    limit_secs = max_duration.as_secs_f64(),
                    "client stopped reading; closing stream at the duration ceiling"
                );
                self.timed_out = true;
                true
            }
        }
    }
}

/// Pumps `fragments` into `tx` until the sequence ends, fails, the client
/// disconnects or `started + max_duration` passes. Waiting on a slow client
/// is bounded by the same deadline.
pub async fn relay_fragments(
    mut fragments: FragmentStream,
    tx: mpsc::Sender<Bytes>,
    started: Instant,
    max_duration: Duration,
) -> RelayOutcome {
    let deadline = started + max_duration;
    let mut sink = RelaySink::new(tx, deadline);
    let mut outcome = RelayOutcome::default();

    loop {
        let next = match tokio::time::timeout_at(deadline, fragments.next()).await {
            Ok(next) => next,
            Err(_) => {
                outcome.timed_out = true;
                Some(Err(UpstreamError::Timeout(max_duration)))
            }
        };

        match next {
            None => break,
            Some(Ok(text)) => {
                if text.is_empty() {
                    continue;
                }
                outcome.fragments += 1;
                let delivery = sink.send(encode_content_event(&text)).await;
                if outcome.stop_on(delivery, max_duration) {
                    return outcome;
                }
            }
            Some(Err(err)) => {
                warn!(
                    error = %err,
                    fragments = outcome.fragments,
                    "upstream stream failed; sending error event"
                );
                outcome.upstream_error = Some(err);
                let delivery = sink.send(encode_content_event(STREAM_ERROR_MESSAGE)).await;
                if outcome.stop_on(delivery, max_duration) {
                    return outcome;
                }
                break;
            }
        }
    }

    if outcome.fragments == 0 && outcome.upstream_error.is_none() {
        info!("no content received from AI model");
        outcome.fallback_used = true;
        let delivery = sink.send(encode_content_event(NO_CONTENT_FALLBACK)).await;
        if outcome.stop_on(delivery, max_duration) {
            return outcome;
        }
    }

    let delivery = sink.finish().await;
    outcome.stop_on(delivery, max_duration);
    outcome
}

/// Response body fed by the encoder channel.
pub fn relay_body_stream(
    mut rx: mpsc::Receiver<Bytes>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<Bytes, Infallible>(chunk);
        }
    }
}

/// Spawns the encoder for `fragments` and returns the body it writes into.
pub fn spawn_relay(
    fragments: FragmentStream,
    started: Instant,
    max_duration: Duration,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let (tx, rx) = mpsc::channel(RELAY_BUFFER);
    tokio::spawn(async move {
        let outcome = relay_fragments(fragments, tx, started, max_duration).await;
        debug!(
            fragments = outcome.fragments,
            fallback = outcome.fallback_used,
            failed = outcome.upstream_error.is_some(),
            disconnected = outcome.client_disconnected,
            timed_out = outcome.timed_out,
            "relay finished"
        );
    });
    relay_body_stream(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    const DONE: &str = "data: [DONE]\n\n";

    fn scripted(items: Vec<Result<&'static str, UpstreamError>>) -> FragmentStream {
        Box::pin(stream::iter(
            items
                .into_iter()
                .map(|item| item.map(str::to_string))
                .collect::<Vec<_>>(),
        ))
    }

    async fn run(fragments: FragmentStream, max_duration: Duration) -> (String, RelayOutcome) {
        let (tx, mut rx) = mpsc::channel(RELAY_BUFFER);
        let outcome = relay_fragments(fragments, tx, Instant::now(), max_duration).await;
        let mut wire = String::new();
        while let Some(chunk) = rx.recv().await {
            wire.push_str(std::str::from_utf8(&chunk).unwrap());
        }
        (wire, outcome)
    }

    #[tokio::test]
    async fn fragments_are_forwarded_in_order_then_done() {
        let (wire, outcome) = run(
            scripted(vec![Ok("Hel"), Ok("lo!")]),
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(
            wire,
            "data: {\"content\":\"Hel\"}\n\ndata: {\"content\":\"lo!\"}\n\ndata: [DONE]\n\n"
        );
        assert_eq!(outcome.fragments, 2);
        assert!(!outcome.fallback_used);
    }

    #[tokio::test]
    async fn empty_sequence_sends_fallback_once() {
        let (wire, outcome) = run(scripted(vec![]), Duration::from_secs(5)).await;

        assert_eq!(
            wire,
            format!("data: {{\"content\":\"{NO_CONTENT_FALLBACK}\"}}\n\n{DONE}")
        );
        assert!(outcome.fallback_used);
    }

    #[tokio::test]
    async fn empty_fragments_count_as_no_content() {
        let (wire, outcome) = run(scripted(vec![Ok(""), Ok("")]), Duration::from_secs(5)).await;

        assert!(outcome.fallback_used);
        assert_eq!(wire.matches("data: ").count(), 2);
        assert_eq!(wire.matches(DONE).count(), 1);
    }

    #[tokio::test]
    async fn mid_stream_failure_keeps_partial_output_and_terminates() {
        let (wire, outcome) = run(
            scripted(vec![
                Ok("partial"),
                Err(UpstreamError::Network("reset".into())),
                Ok("never sent"),
            ]),
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(
            wire,
            format!(
                "data: {{\"content\":\"partial\"}}\n\ndata: {{\"content\":\"{STREAM_ERROR_MESSAGE}\"}}\n\n{DONE}"
            )
        );
        assert_eq!(outcome.upstream_error, Some(UpstreamError::Network("reset".into())));
        assert!(!outcome.fallback_used);
    }

    #[tokio::test]
    async fn failure_before_any_fragment_sends_only_the_error_event() {
        let (wire, outcome) = run(
            scripted(vec![Err(UpstreamError::Provider("overloaded".into()))]),
            Duration::from_secs(5),
        )
        .await;

        assert!(!outcome.fallback_used);
        assert!(!wire.contains(NO_CONTENT_FALLBACK));
        assert!(wire.contains(STREAM_ERROR_MESSAGE));
        assert_eq!(wire.matches(DONE).count(), 1);
    }

    #[tokio::test]
    async fn duration_ceiling_surfaces_as_timeout() {
        let stalled: FragmentStream = Box::pin(
            stream::iter(vec![Ok::<String, UpstreamError>("slow".to_string())])
                .chain(stream::pending()),
        );

        let (wire, outcome) = run(stalled, Duration::from_millis(30)).await;

        assert_eq!(
            outcome.upstream_error,
            Some(UpstreamError::Timeout(Duration::from_millis(30)))
        );
        assert!(wire.starts_with("data: {\"content\":\"slow\"}\n\n"));
        assert!(wire.ends_with(DONE));
        assert_eq!(wire.matches(DONE).count(), 1);
    }

    #[tokio::test]
    async fn unread_body_is_closed_at_the_ceiling() {
        let (tx, _rx) = mpsc::channel(RELAY_BUFFER);
        let endless: FragmentStream =
            Box::pin(stream::repeat(Ok::<String, UpstreamError>("x".to_string())));

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            relay_fragments(endless, tx, Instant::now(), Duration::from_millis(50)),
        )
        .await
        .expect("relay must stop at the duration ceiling");

        assert!(outcome.timed_out);
        assert!(!outcome.client_disconnected);
        assert_eq!(outcome.fragments, RELAY_BUFFER + 1);
    }

    #[tokio::test]
    async fn sentinel_after_the_ceiling_is_bounded_too() {
        let (tx, mut rx) = mpsc::channel(1);
        let started = Instant::now();

        let outcome = relay_fragments(
            scripted(vec![Ok("only")]),
            tx,
            started,
            Duration::from_millis(50),
        )
        .await;

        assert!(outcome.timed_out);
        assert!(started.elapsed() < Duration::from_secs(2));
        let first = rx.recv().await.expect("first event");
        assert_eq!(first, Bytes::from("data: {\"content\":\"only\"}\n\n"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_sink_with_full_channel_still_ends_the_body() {
        let (tx, mut rx) = mpsc::channel(1);
        {
            let mut sink = RelaySink::new(tx, Instant::now() + Duration::from_secs(5));
            assert_eq!(sink.send(encode_content_event("x")).await, Delivery::Sent);
        }

        assert_eq!(rx.recv().await, Some(encode_content_event("x")));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn disconnected_client_stops_the_pump() {
        let (tx, rx) = mpsc::channel(RELAY_BUFFER);
        drop(rx);

        let outcome = relay_fragments(
            scripted(vec![Ok("a"), Ok("b")]),
            tx,
            Instant::now(),
            Duration::from_secs(5),
        )
        .await;

        assert!(outcome.client_disconnected);
        assert_eq!(outcome.fragments, 1);
    }

    #[tokio::test]
    async fn dropped_sink_still_emits_the_sentinel() {
        let (tx, mut rx) = mpsc::channel(RELAY_BUFFER);
        {
            let mut sink = RelaySink::new(tx, Instant::now() + Duration::from_secs(5));
            assert_eq!(sink.send(encode_content_event("x")).await, Delivery::Sent);
        }

        let mut wire = String::new();
        while let Some(chunk) = rx.recv().await {
            wire.push_str(std::str::from_utf8(&chunk).unwrap());
        }
        assert_eq!(wire, format!("data: {{\"content\":\"x\"}}\n\n{DONE}"));
    }

    #[tokio::test]
    async fn spawned_relay_body_yields_the_whole_protocol() {
        let body = spawn_relay(
            scripted(vec![Ok("hi")]),
            Instant::now(),
            Duration::from_secs(5),
        );
        let chunks: Vec<Bytes> = body.map(|chunk| chunk.unwrap()).collect().await;

        assert_eq!(
            chunks,
            vec![
                Bytes::from("data: {\"content\":\"hi\"}\n\n"),
                Bytes::from(DONE),
            ]
        );
    }
}
