use serde::{Deserialize, Serialize};

use crate::errors::DecodeError;
use crate::models::{ArtifactType, FinishReason};

/// One protocol event of an assistant turn, as carried by both transports.
///
/// Wire shape is `{"type": "<tag>", "data": {...}}`. Within a turn the server
/// emits `message_start`, then thinking steps and tool calls interleaved, then
/// content deltas, then artifacts, and exactly one final `message_end`.
///
/// Tags this client does not know decode to [`StreamEvent::Unrecognized`] so the
/// protocol can grow without breaking older clients; consumers log and skip it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum StreamEvent {
    MessageStart {
        message_id: String,
        /// Milliseconds since the Unix epoch.
        timestamp: i64,
    },
    ThinkingStep {
        step: String,
        index: u32,
    },
    ToolCall {
        tool: String,
        query: String,
    },
    ContentDelta {
        delta: String,
        /// The reference backend omits this on some frames; absent means
        /// "the turn currently streaming".
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    ArtifactCreated {
        artifact_id: String,
        artifact_type: ArtifactType,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    MessageEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        finish_reason: FinishReason,
    },
    /// A tag this client does not recognize. Non-fatal by contract.
    #[serde(other)]
    Unrecognized,
}

impl StreamEvent {
    /// Short tag name for logging.
    pub fn tag(&self) -> &'static str {
        match self {
            StreamEvent::MessageStart { .. } => "message_start",
            StreamEvent::ThinkingStep { .. } => "thinking_step",
            StreamEvent::ToolCall { .. } => "tool_call",
            StreamEvent::ContentDelta { .. } => "content_delta",
            StreamEvent::ArtifactCreated { .. } => "artifact_created",
            StreamEvent::MessageEnd { .. } => "message_end",
            StreamEvent::Unrecognized => "unrecognized",
        }
    }
}

/// Decodes one raw frame into an event. Pure: no side effects, same input
/// always yields the same output.
///
/// - invalid JSON → [`DecodeError::Malformed`]
/// - JSON without a string `type` field → [`DecodeError::UnknownTag`]
/// - known tag with a payload that does not fit → [`DecodeError::Malformed`]
/// - unknown tag in a well-formed envelope → `Ok(StreamEvent::Unrecognized)`
pub fn decode(raw: &str) -> Result<StreamEvent, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| DecodeError::Malformed { detail: e.to_string() })?;

    let Some(tag) = value.get("type").and_then(serde_json::Value::as_str) else {
        return Err(DecodeError::UnknownTag {
            detail: "missing or non-string 'type' field".to_string(),
        });
    };

    // `#[serde(other)]` on an adjacently tagged enum rejects any `data`
    // payload, so unknown tags must be routed to `Unrecognized` before
    // handing the envelope to serde.
    match tag {
        "message_start" | "thinking_step" | "tool_call" | "content_delta"
        | "artifact_created" | "message_end" => {}
        _ => return Ok(StreamEvent::Unrecognized),
    }

    serde_json::from_value(value).map_err(|e| DecodeError::Malformed { detail: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_all_known_tags() {
        let frames = [
            (
                r#"{"type":"message_start","data":{"messageId":"m1","timestamp":1700000000000}}"#,
                "message_start",
            ),
            (
                r#"{"type":"thinking_step","data":{"step":"Analyzing...","index":1}}"#,
                "thinking_step",
            ),
            (
                r#"{"type":"tool_call","data":{"tool":"web_search","query":"rust"}}"#,
                "tool_call",
            ),
            (
                r#"{"type":"content_delta","data":{"delta":"Hi ","messageId":"m1"}}"#,
                "content_delta",
            ),
            (
                r#"{"type":"artifact_created","data":{"artifactId":"a1","artifactType":"code","content":"print(1)"}}"#,
                "artifact_created",
            ),
            (
                r#"{"type":"message_end","data":{"messageId":"m1","finishReason":"complete"}}"#,
                "message_end",
            ),
        ];
        for (raw, tag) in frames {
            let event = decode(raw).unwrap();
            assert_eq!(event.tag(), tag, "frame: {raw}");
        }
    }

    #[test]
    fn delta_and_end_allow_missing_message_id() {
        let delta = decode(r#"{"type":"content_delta","data":{"delta":"word "}}"#).unwrap();
        assert_eq!(
            delta,
            StreamEvent::ContentDelta { delta: "word ".into(), message_id: None }
        );

        let end = decode(r#"{"type":"message_end","data":{"finishReason":"complete"}}"#).unwrap();
        assert_eq!(
            end,
            StreamEvent::MessageEnd { message_id: None, finish_reason: crate::models::FinishReason::Complete }
        );
    }

    #[test]
    fn unknown_tag_is_unrecognized_not_an_error() {
        let event = decode(r#"{"type":"usage_report","data":{"tokens":42}}"#).unwrap();
        assert_eq!(event, StreamEvent::Unrecognized);
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert!(matches!(
            decode("not json at all"),
            Err(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn missing_type_field_is_unknown_tag() {
        assert!(matches!(
            decode(r#"{"data":{"delta":"x"}}"#),
            Err(DecodeError::UnknownTag { .. })
        ));
        assert!(matches!(
            decode(r#"{"type":7,"data":{}}"#),
            Err(DecodeError::UnknownTag { .. })
        ));
    }

    #[test]
    fn bad_payload_for_known_tag_is_malformed() {
        assert!(matches!(
            decode(r#"{"type":"thinking_step","data":{"step":"x","index":"one"}}"#),
            Err(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn decode_is_pure() {
        let raw = r#"{"type":"content_delta","data":{"delta":"Hi ","messageId":"m1"}}"#;
        assert_eq!(decode(raw).unwrap(), decode(raw).unwrap());
    }
}
