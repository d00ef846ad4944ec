//! SSE framing for relayed events.

use axum::body::Bytes;
use kairelay_ai::UpstreamEvent;
use serde::Serialize;
use serde_json::Value;

/// Terminal frame sent only after the upstream finished cleanly.
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

#[derive(Serialize)]
struct WireEvent<'a> {
    event: &'a str,
    data: &'a Value,
}

/// Encode one upstream event as a single `data:` line plus a blank line.
///
/// JSON text never contains a raw newline, so the frame is always exactly one
/// SSE `data:` field.
pub fn encode_event(event: &UpstreamEvent) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_string(&WireEvent {
        event: &event.kind,
        data: &event.payload,
    })?;
    Ok(Bytes::from(format!("data: {json}\n\n")))
}

pub fn done_frame() -> Bytes {
    Bytes::from_static(DONE_FRAME)
}
