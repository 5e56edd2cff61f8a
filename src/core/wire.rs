//! Line framing of the relay protocol.
//!
//! Every event is one `data: <payload>\n\n` line. The payload is either a JSON
//! content event (`{"content":"..."}`) or the literal terminal sentinel.

use bytes::Bytes;

use crate::api::ContentEvent;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";
pub const DONE_EVENT: &str = "data: [DONE]\n\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireLine {
    Content(String),
    Done,
    /// Blank, non-data, malformed or content-less lines. Never surfaced.
    Ignored,
}

pub fn encode_content_event(text: &str) -> Bytes {
    let event = ContentEvent {
        content: text.to_string(),
    };
    // Serializing a single string field cannot fail.
    let json = serde_json::to_string(&event).unwrap_or_default();
    Bytes::from(format!("{DATA_PREFIX}{json}\n\n"))
}

pub fn done_event() -> Bytes {
    Bytes::from_static(DONE_EVENT.as_bytes())
}

pub fn parse_wire_line(line: &str) -> WireLine {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return WireLine::Ignored;
    }

    let Some(data) = line.strip_prefix(DATA_PREFIX) else {
        return WireLine::Ignored;
    };

    if data == DONE_SENTINEL {
        return WireLine::Done;
    }

    match serde_json::from_str::<ContentEvent>(data) {
        Ok(event) if !event.content.is_empty() => WireLine::Content(event.content),
        _ => WireLine::Ignored,
    }
}
