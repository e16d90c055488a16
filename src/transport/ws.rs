use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::errors::TransportError;
use crate::retry::ReconnectPolicy;
use crate::transport::{decode_frame, stream_url, StreamHandle, StreamItem, CHANNEL_CAPACITY};

/// Bidirectional transport: upgrades `{ws_base}/stream?conversationId=...` to a
/// full-duplex socket.
///
/// Beyond the receive sequence it accepts client→server payloads via
/// [`WsHandle::send`]. On an unexpected close (anything but an explicit
/// `close()`) it consults the [`ReconnectPolicy`]: linear backoff between
/// attempts, counter reset on success, and a terminal
/// [`TransportError::RetriesExhausted`] once the policy is spent.
#[derive(Debug, Clone)]
pub struct WsClient {
    base: String,
    connect_timeout: Duration,
    policy: ReconnectPolicy,
}

/// Handle to an open socket stream: the receive half plus a send capability.
#[derive(Debug)]
pub struct WsHandle {
    stream: StreamHandle,
    outbound: mpsc::Sender<String>,
}

impl WsHandle {
    pub async fn recv(&mut self) -> Option<StreamItem> {
        self.stream.recv().await
    }

    pub fn close(&self) {
        self.stream.close();
    }

    /// The receive half, for callers (like the turn controller) that consume
    /// any transport uniformly.
    pub fn stream_mut(&mut self) -> &mut StreamHandle {
        &mut self.stream
    }

    /// A detachable send half, so a stop action can write to the socket while
    /// the receive half is lent out to the turn controller.
    pub fn sender(&self) -> WsSender {
        WsSender { outbound: self.outbound.clone() }
    }

    /// Sends a JSON payload to the server, e.g. a
    /// [`ClientCommand::Stop`](crate::transport::ClientCommand) signal.
    pub async fn send<T: Serialize>(&self, payload: &T) -> Result<(), TransportError> {
        self.sender().send(payload).await
    }
}

/// Cloneable send half of an open socket stream.
#[derive(Debug, Clone)]
pub struct WsSender {
    outbound: mpsc::Sender<String>,
}

impl WsSender {
    pub async fn send<T: Serialize>(&self, payload: &T) -> Result<(), TransportError> {
        let text = serde_json::to_string(payload)
            .map_err(|e| TransportError::Stream { detail: e.to_string() })?;
        self.outbound
            .send(text)
            .await
            .map_err(|_| TransportError::SendOnClosed)
    }
}

impl WsClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            base: config.ws_base.clone(),
            connect_timeout: config.connect_timeout,
            policy: config.reconnect,
        }
    }

    /// Opens a socket stream for a conversation. `last_event_id` resumes from
    /// a cursor; `None` starts from now.
    pub fn open(&self, conversation_id: &str, last_event_id: Option<&str>) -> WsHandle {
        let url = stream_url(&self.base, conversation_id, last_event_id);
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        tokio::spawn(run_socket(
            url,
            self.connect_timeout,
            self.policy,
            tx,
            out_rx,
            cancel.clone(),
        ));

        WsHandle { stream: StreamHandle::new(rx, cancel), outbound: out_tx }
    }
}

/// Connection loop: connect, pump, and on unexpected close retry per policy.
async fn run_socket(
    url: String,
    connect_timeout: Duration,
    policy: ReconnectPolicy,
    tx: mpsc::Sender<StreamItem>,
    mut out_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    // Failed reconnect attempts since the last successful connection. The
    // initial connect of an `open()` is not a retry and does not count.
    let mut attempt: u32 = 0;

    'outer: loop {
        let connecting = tokio::time::timeout(connect_timeout, connect_async(url.clone()));
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break 'outer,
            outcome = connecting => outcome,
        };

        let socket = match outcome {
            Ok(Ok((socket, _response))) => socket,
            Ok(Err(e)) => {
                debug!("WebSocket connect to {url} failed: {e}");
                if !backoff_or_fail(&policy, &mut attempt, &tx, &cancel).await {
                    break 'outer;
                }
                continue;
            }
            Err(_elapsed) => {
                debug!(
                    "WebSocket connect to {url} timed out after {}ms",
                    connect_timeout.as_millis()
                );
                if !backoff_or_fail(&policy, &mut attempt, &tx, &cancel).await {
                    break 'outer;
                }
                continue;
            }
        };

        attempt = 0;
        info!("WebSocket connected: {url}");
        if tx.send(StreamItem::Connected).await.is_err() {
            break 'outer;
        }

        let (mut sink, mut read) = socket.split();
        let reason = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Explicit close: best-effort close frame, no reconnect.
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break 'outer;
                }
                cmd = out_rx.recv() => match cmd {
                    Some(text) => {
                        if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                            break format!("send failed: {e}");
                        }
                    }
                    // Handle dropped; treat like an explicit close.
                    None => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        break 'outer;
                    }
                },
                frame = read.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        // Bad frames are dropped individually, never fatal.
                        if let Some(event) = decode_frame(text.as_str()) {
                            if tx.send(StreamItem::Event(event)).await.is_err() {
                                break 'outer;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        break match frame {
                            Some(f) => format!("server closed: {}", f.reason),
                            None => "server closed the connection".to_string(),
                        };
                    }
                    Some(Ok(_)) => {} // ping/pong/binary: nothing to decode
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {e}");
                        break format!("socket error: {e}");
                    }
                    None => break "connection dropped".to_string(),
                },
            }
        };

        if tx.send(StreamItem::Disconnected { reason }).await.is_err() {
            break 'outer;
        }
        if !backoff_or_fail(&policy, &mut attempt, &tx, &cancel).await {
            break 'outer;
        }
    }
}

/// Advances the attempt counter and sleeps the linear backoff. Returns `false`
/// when the policy is exhausted (after surfacing the terminal failure) or the
/// stream was cancelled mid-wait.
async fn backoff_or_fail(
    policy: &ReconnectPolicy,
    attempt: &mut u32,
    tx: &mpsc::Sender<StreamItem>,
    cancel: &CancellationToken,
) -> bool {
    *attempt += 1;
    if !policy.should_retry(*attempt) {
        let _ = tx
            .send(StreamItem::Failed(TransportError::RetriesExhausted {
                attempts: policy.max_attempts,
            }))
            .await;
        return false;
    }

    let delay = policy.delay_for(*attempt);
    debug!("Reconnect attempt {attempt} in {}ms", delay.as_millis());
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
