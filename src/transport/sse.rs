use std::time::Duration;

use futures_util::StreamExt;
use reqwest_eventsource::{retry, Error as EsError, Event as EsEvent, EventSource};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::errors::TransportError;
use crate::transport::{decode_frame, stream_url, StreamHandle, StreamItem, CHANNEL_CAPACITY};

/// Server-push transport: consumes `text/event-stream` frames from
/// `GET {base}/stream?conversationId=...`.
///
/// One-directional — user messages go out-of-band through the REST client
/// before the stream is opened. No auto-reconnect either: when the channel
/// drops the caller decides whether to re-open (optionally resuming with the
/// last event id). Reconnection-with-backoff belongs to the socket variant.
#[derive(Debug, Clone)]
pub struct SseClient {
    http: reqwest::Client,
    base: String,
    connect_timeout: Duration,
}

impl SseClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: config.stream_base.clone(),
            connect_timeout: config.connect_timeout,
        }
    }

    /// Opens a stream for a conversation. `last_event_id` resumes from a
    /// cursor; `None` starts from now.
    pub fn open(&self, conversation_id: &str, last_event_id: Option<&str>) -> StreamHandle {
        let url = stream_url(&self.base, conversation_id, None);
        let mut request = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(cursor) = last_event_id {
            request = request.header("Last-Event-ID", cursor.to_string());
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let connect_timeout = self.connect_timeout;

        tokio::spawn(async move {
            let mut es = match EventSource::new(request) {
                Ok(es) => es,
                Err(e) => {
                    let _ = tx
                        .send(StreamItem::Failed(TransportError::ConnectFailed {
                            url,
                            detail: e.to_string(),
                        }))
                        .await;
                    return;
                }
            };
            // Retry stays the caller's decision; never reconnect under the hood.
            es.set_retry_policy(Box::new(retry::Never));

            let mut connected = false;
            loop {
                // Until the first Open arrives, the wait is bounded by the
                // connect timeout; afterwards the stream may idle indefinitely.
                let next = if connected {
                    tokio::select! {
                        _ = task_cancel.cancelled() => break,
                        next = es.next() => next,
                    }
                } else {
                    tokio::select! {
                        _ = task_cancel.cancelled() => break,
                        next = tokio::time::timeout(connect_timeout, es.next()) => match next {
                            Ok(item) => item,
                            Err(_) => {
                                let _ = tx
                                    .send(StreamItem::Failed(TransportError::ConnectTimeout {
                                        millis: connect_timeout.as_millis() as u64,
                                    }))
                                    .await;
                                break;
                            }
                        },
                    }
                };

                match next {
                    Some(Ok(EsEvent::Open)) => {
                        connected = true;
                        info!("SSE stream connected: {url}");
                        if tx.send(StreamItem::Connected).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(EsEvent::Message(msg))) => {
                        let Some(event) = decode_frame(&msg.data) else {
                            continue;
                        };
                        if tx.send(StreamItem::Event(event)).await.is_err() {
                            break;
                        }
                    }
                    // Per-frame parse faults drop the frame, not the stream.
                    Some(Err(EsError::Utf8(e))) => {
                        warn!("Skipping non-UTF-8 SSE frame: {e}");
                    }
                    Some(Err(EsError::Parser(e))) => {
                        warn!("Skipping unparsable SSE frame: {e}");
                    }
                    Some(Err(EsError::StreamEnded)) | None => {
                        debug!("SSE stream ended: {url}");
                        let _ = tx
                            .send(StreamItem::Disconnected {
                                reason: "server closed the stream".to_string(),
                            })
                            .await;
                        break;
                    }
                    Some(Err(e)) => {
                        let _ = tx
                            .send(StreamItem::Failed(TransportError::Stream {
                                detail: e.to_string(),
                            }))
                            .await;
                        break;
                    }
                }
            }
            es.close();
        });

        StreamHandle::new(rx, cancel)
    }
}
