//! Client side of the relay protocol: reads the response body incrementally
//! and reports what it finds as [`StreamMessage`]s tagged with a stream id.

use std::fmt;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use memchr::memchr;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::wire::{parse_wire_line, WireLine};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamMessage {
    /// The relay accepted the request; content may follow.
    Opened,
    /// Sent once, right before the first chunk.
    FirstContent,
    Chunk(String),
    End,
    /// Reading the stream failed. Carries a diagnostic, not display text.
    Error(String),
}

pub type StreamSender = mpsc::UnboundedSender<(StreamMessage, u64)>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeOutcome {
    pub chunks: usize,
    pub saw_done: bool,
    pub failed: bool,
}

struct LineState {
    chunks: usize,
    saw_done: bool,
}

impl LineState {
    fn handle_line(&mut self, raw: &[u8], tx: &StreamSender, stream_id: u64) {
        let Ok(line) = std::str::from_utf8(raw) else {
            debug!(stream_id, "ignoring non UTF-8 relay line");
            return;
        };

        match parse_wire_line(line) {
            WireLine::Content(text) => {
                if self.chunks == 0 {
                    let _ = tx.send((StreamMessage::FirstContent, stream_id));
                }
                self.chunks += 1;
                let _ = tx.send((StreamMessage::Chunk(text), stream_id));
            }
            WireLine::Done => self.saw_done = true,
            WireLine::Ignored => {}
        }
    }
}

/// Reads `body` to the end. Partial lines are held back until the rest of the
/// line arrives; lines that still do not parse are dropped. Exactly one of
/// `End` or `Error` is sent before returning.
pub async fn consume_relay_stream<S, E>(body: S, tx: &StreamSender, stream_id: u64) -> ConsumeOutcome
where
    S: Stream<Item = Result<Bytes, E>>,
    E: fmt::Display,
{
    futures_util::pin_mut!(body);
    let mut buffer: Vec<u8> = Vec::new();
    let mut state = LineState {
        chunks: 0,
        saw_done: false,
    };

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(stream_id, error = %e, "relay stream read failed");
                let _ = tx.send((StreamMessage::Error(e.to_string()), stream_id));
                return ConsumeOutcome {
                    chunks: state.chunks,
                    saw_done: state.saw_done,
                    failed: true,
                };
            }
        };

        buffer.extend_from_slice(&chunk);
        while let Some(newline_pos) = memchr(b'\n', &buffer) {
            state.handle_line(&buffer[..newline_pos], tx, stream_id);
            buffer.drain(..=newline_pos);
        }
    }

    if !buffer.is_empty() {
        state.handle_line(&buffer, tx, stream_id);
    }

    if !state.saw_done {
        warn!(stream_id, "relay stream ended without a terminal sentinel");
    }

    let _ = tx.send((StreamMessage::End, stream_id));
    ConsumeOutcome {
        chunks: state.chunks,
        saw_done: state.saw_done,
        failed: false,
    }
}
