use thiserror::Error;

/// Failure to turn a raw wire frame into a [`StreamEvent`](crate::event::StreamEvent).
///
/// Both variants are recoverable at the call site: transports log the frame and
/// keep reading, one bad frame never terminates a stream.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed frame: {detail}")]
    Malformed { detail: String },

    #[error("Frame has no usable event tag: {detail}")]
    UnknownTag { detail: String },
}

/// Connection-level failures surfaced by the transport clients.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect to {url}: {detail}")]
    ConnectFailed { url: String, detail: String },

    #[error("Connection attempt timed out after {millis}ms")]
    ConnectTimeout { millis: u64 },

    #[error("Stream error: {detail}")]
    Stream { detail: String },

    #[error("Gave up after {attempts} failed connection attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Cannot send: connection is closed")]
    SendOnClosed,
}

impl TransportError {
    /// Permanent failures end the turn; everything else feeds the reconnect loop.
    pub fn is_permanent(&self) -> bool {
        matches!(self, TransportError::RetriesExhausted { .. })
    }
}

/// Errors from the request/response persistence collaborator (§6 surface).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Failed to parse server response: {detail}")]
    Parse { detail: String },
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Status { status: 404, .. })
    }
}

/// A detectable breach of the event-ordering contract within one turn.
///
/// Violations are recorded and the offending event discarded; they never abort
/// the turn — a partial but readable answer beats losing the whole reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("thinking_step index {got} arrived, expected {expected}")]
    OutOfOrderThinkingStep { expected: u32, got: u32 },

    #[error("{tag} event arrived before message_start")]
    EventBeforeStart { tag: &'static str },

    #[error("{tag} event arrived after message_end")]
    EventAfterEnd { tag: &'static str },

    #[error("second message_start for '{message_id}' while a turn is streaming")]
    DuplicateMessageStart { message_id: String },

    #[error("artifact '{artifact_id}' created twice in one turn")]
    DuplicateArtifact { artifact_id: String },

    #[error("event addressed message '{got}' but the active turn is '{expected}'")]
    MismatchedMessageId { expected: String, got: String },
}

/// Errors surfaced by [`TurnController`](crate::turn::TurnController) before or
/// while a turn runs. Decode/protocol faults are absorbed and never appear here.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("A turn is already in flight for conversation '{conversation_id}'")]
    TurnInFlight { conversation_id: String },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
