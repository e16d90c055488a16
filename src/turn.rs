use chrono::{DateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::errors::{ProtocolViolation, TurnError};
use crate::event::StreamEvent;
use crate::models::{Artifact, Attachment, FinishReason, Message};
use crate::store::Store;
use crate::transport::{StreamHandle, StreamItem};

/// Lifecycle of one assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Sending,
    Streaming,
    Completed,
    Stopped,
    Errored,
}

impl TurnPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnPhase::Completed | TurnPhase::Stopped | TurnPhase::Errored)
    }
}

/// Result of folding one event into the accumulator.
#[derive(Debug)]
pub enum Applied {
    /// Draft advanced (started, or a step/call/delta appended).
    Progress,
    /// An artifact was produced; the caller registers it with the store.
    Artifact(Artifact),
    /// Terminal `message_end` consumed; the draft is frozen.
    Finished(FinishReason),
    /// The event breached the ordering contract and was discarded.
    Rejected(ProtocolViolation),
    /// An `unrecognized` (future-tag) event; nothing to do.
    Skipped,
}

/// Pure per-turn fold: applies protocol events to an assistant-message draft,
/// enforcing the ordering invariant and recording (never propagating) any
/// violations. Out-of-order delivery is not tolerated — events are applied
/// strictly in arrival order.
#[derive(Debug)]
pub struct TurnAccumulator {
    conversation_id: String,
    phase: TurnPhase,
    draft: Option<Message>,
    last_thinking_index: u32,
    seen_artifacts: Vec<String>,
    violations: Vec<ProtocolViolation>,
}

impl TurnAccumulator {
    /// A fresh accumulator in `Sending`: the user message is out the door and
    /// the stream is awaited.
    pub fn sending(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            phase: TurnPhase::Sending,
            draft: None,
            last_thinking_index: 0,
            seen_artifacts: Vec::new(),
            violations: Vec::new(),
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn draft(&self) -> Option<&Message> {
        self.draft.as_ref()
    }

    pub fn violations(&self) -> &[ProtocolViolation] {
        &self.violations
    }

    /// Folds one event into the draft.
    pub fn apply(&mut self, event: StreamEvent) -> Applied {
        if self.phase.is_terminal() {
            // No further events for this turn are valid after message_end.
            return match event {
                StreamEvent::Unrecognized => Applied::Skipped,
                other => self.reject(ProtocolViolation::EventAfterEnd { tag: other.tag() }),
            };
        }

        match event {
            StreamEvent::MessageStart { message_id, timestamp } => {
                if self.phase == TurnPhase::Streaming {
                    return self
                        .reject(ProtocolViolation::DuplicateMessageStart { message_id });
                }
                self.draft = Some(Message::assistant_shell(
                    message_id,
                    self.conversation_id.clone(),
                    millis_to_utc(timestamp),
                ));
                self.phase = TurnPhase::Streaming;
                Applied::Progress
            }

            StreamEvent::ThinkingStep { step, index } => {
                if let Some(rejection) = self.require_streaming("thinking_step") {
                    return rejection;
                }
                let expected = self.last_thinking_index + 1;
                if index != expected {
                    return self.reject(ProtocolViolation::OutOfOrderThinkingStep {
                        expected,
                        got: index,
                    });
                }
                self.last_thinking_index = index;
                if let Some(draft) = self.draft.as_mut() {
                    draft.thinking_steps.push(crate::models::ThinkingStep { step, index });
                }
                Applied::Progress
            }

            StreamEvent::ToolCall { tool, query } => {
                if let Some(rejection) = self.require_streaming("tool_call") {
                    return rejection;
                }
                if let Some(draft) = self.draft.as_mut() {
                    draft.tool_calls.push(crate::models::ToolCallRecord { tool, query });
                }
                Applied::Progress
            }

            StreamEvent::ContentDelta { delta, message_id } => {
                if let Some(rejection) = self.require_streaming("content_delta") {
                    return rejection;
                }
                if let Some(violation) = self.check_message_id(message_id) {
                    return self.reject(violation);
                }
                if let Some(draft) = self.draft.as_mut() {
                    draft.content.push_str(&delta);
                }
                Applied::Progress
            }

            StreamEvent::ArtifactCreated {
                artifact_id,
                artifact_type,
                content,
                title,
                language,
            } => {
                if let Some(rejection) = self.require_streaming("artifact_created") {
                    return rejection;
                }
                if self.seen_artifacts.iter().any(|id| *id == artifact_id) {
                    return self.reject(ProtocolViolation::DuplicateArtifact { artifact_id });
                }
                self.seen_artifacts.push(artifact_id.clone());
                if let Some(draft) = self.draft.as_mut() {
                    draft.artifact_id = Some(artifact_id.clone());
                }
                Applied::Artifact(Artifact::new(
                    artifact_id,
                    artifact_type,
                    title,
                    content,
                    language,
                ))
            }

            StreamEvent::MessageEnd { message_id, finish_reason } => {
                if let Some(rejection) = self.require_streaming("message_end") {
                    return rejection;
                }
                if let Some(violation) = self.check_message_id(message_id) {
                    return self.reject(violation);
                }
                if let Some(draft) = self.draft.as_mut() {
                    draft.finish_reason = Some(finish_reason);
                }
                self.phase = match finish_reason {
                    FinishReason::Complete => TurnPhase::Completed,
                    FinishReason::Stop => TurnPhase::Stopped,
                    FinishReason::Error => TurnPhase::Errored,
                };
                Applied::Finished(finish_reason)
            }

            StreamEvent::Unrecognized => Applied::Skipped,
        }
    }

    /// Freezes a partial draft outside the normal `message_end` path — user
    /// cancel or permanent transport failure.
    pub fn freeze(&mut self, reason: FinishReason) {
        if self.phase.is_terminal() {
            return;
        }
        if let Some(draft) = self.draft.as_mut() {
            draft.finish_reason = Some(reason);
        }
        self.phase = match reason {
            FinishReason::Complete => TurnPhase::Completed,
            FinishReason::Stop => TurnPhase::Stopped,
            FinishReason::Error => TurnPhase::Errored,
        };
    }

    /// Consumes the accumulator, yielding the (possibly partial) assistant
    /// message when one was started.
    pub fn into_message(self) -> Option<Message> {
        self.draft
    }

    /// Records a rejection when the event arrived outside the Streaming phase.
    /// Terminal phases were already handled, so "not streaming" here means
    /// "before message_start".
    fn require_streaming(&mut self, tag: &'static str) -> Option<Applied> {
        if self.phase != TurnPhase::Streaming {
            return Some(self.reject(ProtocolViolation::EventBeforeStart { tag }));
        }
        None
    }

    /// A non-empty `message_id` must address the active draft.
    fn check_message_id(&self, message_id: Option<String>) -> Option<ProtocolViolation> {
        let id = message_id?;
        let draft_id = self.draft.as_ref().map(|d| d.id.clone())?;
        if id != draft_id {
            return Some(ProtocolViolation::MismatchedMessageId { expected: draft_id, got: id });
        }
        None
    }

    fn reject(&mut self, violation: ProtocolViolation) -> Applied {
        self.violations.push(violation.clone());
        Applied::Rejected(violation)
    }
}

fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

/// How a driven turn ended.
#[derive(Debug)]
pub struct TurnOutcome {
    pub phase: TurnPhase,
    /// The frozen assistant message, absent when the stream failed before
    /// `message_start`.
    pub message: Option<Message>,
    pub violations: Vec<ProtocolViolation>,
}

/// Orchestrates one assistant turn: submits the user message, consumes the
/// event stream, folds it into a message, and applies terminal state to the
/// store.
///
/// Decode- and protocol-level faults never escape as errors — they end up as
/// message/artifact state (and recorded violations) the UI can render. Only
/// pre-stream failures and permanent transport failure surface as [`TurnError`].
#[derive(Debug, Clone)]
pub struct TurnController {
    api: ApiClient,
    store: Store,
}

impl TurnController {
    pub fn new(api: ApiClient, store: Store) -> Self {
        Self { api, store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Runs a full turn over an already-opened stream. `cancel` is the user's
    /// stop action: cooperative, takes effect at the next suspension point,
    /// closes the handle, and freezes the partial message with
    /// `finish_reason = stop`.
    pub async fn run_turn(
        &self,
        conversation_id: &str,
        content: String,
        attachments: Vec<Attachment>,
        stream: &mut StreamHandle,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        self.run_turn_with_progress(conversation_id, content, attachments, stream, cancel, |_| {})
            .await
    }

    /// Like [`run_turn`](Self::run_turn), invoking `on_delta` for each applied
    /// content fragment so a frontend can render the answer as it streams.
    pub async fn run_turn_with_progress(
        &self,
        conversation_id: &str,
        content: String,
        attachments: Vec<Attachment>,
        stream: &mut StreamHandle,
        cancel: CancellationToken,
        on_delta: impl FnMut(&str),
    ) -> Result<TurnOutcome, TurnError> {
        self.store.begin_turn(conversation_id)?;
        let result = self
            .drive(conversation_id, content, attachments, stream, cancel, on_delta)
            .await;
        self.store.end_turn(conversation_id);
        result
    }

    async fn drive(
        &self,
        conversation_id: &str,
        content: String,
        attachments: Vec<Attachment>,
        stream: &mut StreamHandle,
        cancel: CancellationToken,
        mut on_delta: impl FnMut(&str),
    ) -> Result<TurnOutcome, TurnError> {
        // Out-of-band submit; its acceptance moves us into the stream wait.
        // The user message is recorded only once the server has it — a failed
        // submit must leave the conversation untouched.
        let ack = self
            .api
            .send_message(conversation_id, &content, &attachments)
            .await?;
        debug!("Message accepted: id={} status={}", ack.message_id, ack.status);
        self.store
            .append_message(Message::user(conversation_id.to_string(), content, attachments));

        let mut acc = TurnAccumulator::sending(conversation_id);

        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Turn cancelled by user for conversation {conversation_id}");
                    stream.close();
                    acc.freeze(FinishReason::Stop);
                    break;
                }
                item = stream.recv() => item,
            };

            match item {
                Some(StreamItem::Connected) => {
                    debug!("Stream connected for conversation {conversation_id}");
                }
                Some(StreamItem::Event(event)) => {
                    let fragment = match &event {
                        StreamEvent::ContentDelta { delta, .. } => Some(delta.clone()),
                        _ => None,
                    };
                    match acc.apply(event) {
                        Applied::Progress => {
                            if let Some(fragment) = fragment {
                                on_delta(&fragment);
                            }
                        }
                        Applied::Artifact(artifact) => {
                            if !self.store.add_artifact(conversation_id, artifact) {
                                warn!("Artifact already registered; ignoring duplicate");
                            }
                        }
                        Applied::Finished(reason) => {
                            debug!("Turn finished: {reason:?}");
                            break;
                        }
                        Applied::Rejected(violation) => {
                            warn!("Protocol violation (event discarded): {violation}");
                        }
                        Applied::Skipped => {
                            debug!("Skipping unrecognized event");
                        }
                    }
                }
                Some(StreamItem::Disconnected { reason }) => {
                    // The socket variant may still reconnect; only Failed or a
                    // closed channel is final.
                    warn!("Stream disconnected mid-turn: {reason}");
                }
                Some(StreamItem::Failed(e)) => {
                    warn!("Transport failure ends the turn: {e}");
                    acc.freeze(FinishReason::Error);
                    break;
                }
                None => {
                    if !acc.phase().is_terminal() {
                        warn!("Stream closed before message_end");
                        acc.freeze(FinishReason::Error);
                    }
                    break;
                }
            }
        }

        stream.close();

        let phase = acc.phase();
        let violations = acc.violations().to_vec();
        let message = acc.into_message();
        // Even a partial answer is worth showing; freezing flagged it with the
        // finish reason the UI needs for retry/regenerate affordances.
        if let Some(msg) = message.clone() {
            self.store.append_message(msg);
        }

        Ok(TurnOutcome { phase, message, violations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArtifactType;

    fn start_event(id: &str) -> StreamEvent {
        StreamEvent::MessageStart { message_id: id.into(), timestamp: 1_700_000_000_000 }
    }

    fn end_event(id: &str, reason: FinishReason) -> StreamEvent {
        StreamEvent::MessageEnd { message_id: Some(id.into()), finish_reason: reason }
    }

    fn delta(text: &str) -> StreamEvent {
        StreamEvent::ContentDelta { delta: text.into(), message_id: None }
    }

    #[test]
    fn happy_path_concatenates_deltas_in_order() {
        let mut acc = TurnAccumulator::sending("c1");
        acc.apply(start_event("m1"));
        acc.apply(StreamEvent::ThinkingStep { step: "Analyzing...".into(), index: 1 });
        acc.apply(delta("Hi "));
        acc.apply(delta("there."));
        assert!(matches!(
            acc.apply(end_event("m1", FinishReason::Complete)),
            Applied::Finished(FinishReason::Complete)
        ));

        assert_eq!(acc.phase(), TurnPhase::Completed);
        assert!(acc.violations().is_empty());
        let msg = acc.into_message().unwrap();
        assert_eq!(msg.content, "Hi there.");
        assert_eq!(msg.thinking_steps.len(), 1);
        assert_eq!(msg.thinking_steps[0].index, 1);
        assert_eq!(msg.finish_reason, Some(FinishReason::Complete));
    }

    #[test]
    fn thinking_steps_must_be_gapless_and_ascending() {
        let mut acc = TurnAccumulator::sending("c1");
        acc.apply(start_event("m1"));
        acc.apply(StreamEvent::ThinkingStep { step: "one".into(), index: 1 });
        // Index 3 when 2 was expected: discarded, recorded, turn continues.
        assert!(matches!(
            acc.apply(StreamEvent::ThinkingStep { step: "three".into(), index: 3 }),
            Applied::Rejected(ProtocolViolation::OutOfOrderThinkingStep { expected: 2, got: 3 })
        ));
        acc.apply(StreamEvent::ThinkingStep { step: "two".into(), index: 2 });
        acc.apply(end_event("m1", FinishReason::Complete));

        assert_eq!(acc.violations().len(), 1);
        let msg = acc.into_message().unwrap();
        let indexes: Vec<_> = msg.thinking_steps.iter().map(|s| s.index).collect();
        assert_eq!(indexes, vec![1, 2]);
    }

    #[test]
    fn artifact_registers_once_and_links_message() {
        let mut acc = TurnAccumulator::sending("c1");
        acc.apply(start_event("m1"));
        let applied = acc.apply(StreamEvent::ArtifactCreated {
            artifact_id: "a1".into(),
            artifact_type: ArtifactType::Code,
            content: "print(1)".into(),
            title: None,
            language: Some("python".into()),
        });
        let Applied::Artifact(artifact) = applied else {
            panic!("expected artifact");
        };
        assert_eq!(artifact.id, "a1");
        assert_eq!(artifact.kind, ArtifactType::Code);
        assert_eq!(acc.draft().unwrap().artifact_id.as_deref(), Some("a1"));

        // Same id again is a violation, not a second artifact.
        assert!(matches!(
            acc.apply(StreamEvent::ArtifactCreated {
                artifact_id: "a1".into(),
                artifact_type: ArtifactType::Code,
                content: "print(2)".into(),
                title: None,
                language: None,
            }),
            Applied::Rejected(ProtocolViolation::DuplicateArtifact { .. })
        ));
    }

    #[test]
    fn second_message_start_is_rejected() {
        let mut acc = TurnAccumulator::sending("c1");
        acc.apply(start_event("m1"));
        acc.apply(delta("partial"));
        assert!(matches!(
            acc.apply(start_event("m2")),
            Applied::Rejected(ProtocolViolation::DuplicateMessageStart { .. })
        ));
        // The original draft is untouched.
        assert_eq!(acc.draft().unwrap().id, "m1");
        assert_eq!(acc.draft().unwrap().content, "partial");
    }

    #[test]
    fn events_before_start_and_after_end_are_discarded() {
        let mut acc = TurnAccumulator::sending("c1");
        assert!(matches!(
            acc.apply(delta("early")),
            Applied::Rejected(ProtocolViolation::EventBeforeStart { tag: "content_delta" })
        ));

        acc.apply(start_event("m1"));
        acc.apply(delta("Hi"));
        acc.apply(end_event("m1", FinishReason::Complete));

        assert!(matches!(
            acc.apply(delta(" late")),
            Applied::Rejected(ProtocolViolation::EventAfterEnd { tag: "content_delta" })
        ));
        assert_eq!(acc.into_message().unwrap().content, "Hi");
    }

    #[test]
    fn mismatched_delta_message_id_is_discarded() {
        let mut acc = TurnAccumulator::sending("c1");
        acc.apply(start_event("m1"));
        assert!(matches!(
            acc.apply(StreamEvent::ContentDelta {
                delta: "stray".into(),
                message_id: Some("m9".into()),
            }),
            Applied::Rejected(ProtocolViolation::MismatchedMessageId { .. })
        ));
        assert_eq!(acc.draft().unwrap().content, "");
    }

    #[test]
    fn freeze_marks_partial_draft_stopped() {
        let mut acc = TurnAccumulator::sending("c1");
        acc.apply(start_event("m1"));
        acc.apply(delta("Hi "));
        acc.apply(delta("there."));
        acc.freeze(FinishReason::Stop);

        assert_eq!(acc.phase(), TurnPhase::Stopped);
        let msg = acc.into_message().unwrap();
        assert_eq!(msg.content, "Hi there.");
        assert_eq!(msg.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn unrecognized_events_are_skipped_silently() {
        let mut acc = TurnAccumulator::sending("c1");
        acc.apply(start_event("m1"));
        assert!(matches!(acc.apply(StreamEvent::Unrecognized), Applied::Skipped));
        acc.apply(end_event("m1", FinishReason::Complete));
        assert!(matches!(acc.apply(StreamEvent::Unrecognized), Applied::Skipped));
        assert!(acc.violations().is_empty());
    }

    #[test]
    fn message_end_with_error_reason_errors_the_turn() {
        let mut acc = TurnAccumulator::sending("c1");
        acc.apply(start_event("m1"));
        acc.apply(delta("partial answer"));
        acc.apply(end_event("m1", FinishReason::Error));
        assert_eq!(acc.phase(), TurnPhase::Errored);
        let msg = acc.into_message().unwrap();
        assert_eq!(msg.finish_reason, Some(FinishReason::Error));
        assert_eq!(msg.content, "partial answer");
    }
}
