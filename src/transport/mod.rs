//! Transport clients for the streaming event protocol.
//!
//! Two interchangeable variants deliver the same decoded [`StreamEvent`]
//! sequence: [`sse::SseClient`] (server-push, one-directional) and
//! [`ws::WsClient`] (full-duplex socket with reconnection). Both surface
//! connection lifecycle alongside events, strictly in arrival order, on a
//! single channel per stream.

pub mod sse;
pub mod ws;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::errors::{DecodeError, TransportError};
use crate::event::{self, StreamEvent};

/// Buffer between the transport task and the consumer. Events are applied far
/// faster than the network produces them, so a small buffer suffices.
pub(crate) const CHANNEL_CAPACITY: usize = 64;

/// One notification from a transport, delivered in arrival order.
#[derive(Debug)]
pub enum StreamItem {
    /// The underlying connection is established (again, after a reconnect).
    Connected,
    /// A decoded protocol event.
    Event(StreamEvent),
    /// The connection dropped. For the socket variant a reconnect may follow;
    /// the stream is only over once `Failed` arrives or the channel closes.
    Disconnected { reason: String },
    /// Unrecoverable transport failure; no further items follow.
    Failed(TransportError),
}

/// Receiving half of an open stream.
///
/// `recv` is the caller's single suspension point. Closing the handle (or
/// dropping it) cancels the transport task, which tears the connection down on
/// every exit path and unblocks any pending `recv`.
#[derive(Debug)]
pub struct StreamHandle {
    items: mpsc::Receiver<StreamItem>,
    cancel: CancellationToken,
}

impl StreamHandle {
    pub(crate) fn new(
        items: mpsc::Receiver<StreamItem>,
        cancel: CancellationToken,
    ) -> Self {
        Self { items, cancel }
    }

    /// Next notification, or `None` once the stream is finished and drained.
    pub async fn recv(&mut self) -> Option<StreamItem> {
        self.items.recv().await
    }

    /// Tears down the underlying connection. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Token observed by the transport task; exposed so callers can tie other
    /// work (e.g. a user stop action) to this stream's lifetime.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Client→server payload for the socket variant, e.g. a stop signal.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Ask the producer to stop generating the current turn. Cooperative: the
    /// local side freezes regardless of whether the server complies.
    Stop { conversation_id: String },
}

/// Decodes one raw frame, absorbing failures: a bad frame is logged and
/// dropped, it never terminates the stream.
pub(crate) fn decode_frame(raw: &str) -> Option<StreamEvent> {
    match event::decode(raw) {
        Ok(event) => Some(event),
        Err(DecodeError::Malformed { detail }) => {
            warn!("Skipping malformed frame: {detail}");
            None
        }
        Err(DecodeError::UnknownTag { detail }) => {
            warn!("Skipping untagged frame: {detail}");
            None
        }
    }
}

/// Builds the streaming URL shared by both variants.
pub(crate) fn stream_url(
    base: &str,
    conversation_id: &str,
    last_event_id: Option<&str>,
) -> String {
    let mut url = format!("{base}/stream?conversationId={conversation_id}");
    if let Some(cursor) = last_event_id {
        url.push_str("&lastEventId=");
        url.push_str(cursor);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_includes_resume_cursor_only_when_present() {
        assert_eq!(
            stream_url("ws://h", "c1", None),
            "ws://h/stream?conversationId=c1"
        );
        assert_eq!(
            stream_url("ws://h", "c1", Some("42")),
            "ws://h/stream?conversationId=c1&lastEventId=42"
        );
    }

    #[test]
    fn decode_frame_absorbs_bad_input() {
        assert!(decode_frame("{garbage").is_none());
        assert!(decode_frame(r#"{"no":"type"}"#).is_none());
        assert!(decode_frame(
            r#"{"type":"content_delta","data":{"delta":"x"}}"#
        )
        .is_some());
    }

    #[test]
    fn stop_command_serializes_with_tag() {
        let cmd = ClientCommand::Stop { conversation_id: "c1".into() };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "stop");
        assert_eq!(json["conversationId"], "c1");
    }
}
