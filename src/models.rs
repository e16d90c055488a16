use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: u32,
}

impl Conversation {
    pub fn new(id: String, title: String) -> Self {
        let now = Utc::now();
        Self { id, title, created_at: now, updated_at: now, message_count: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for MessageRole {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

/// One reasoning step surfaced while the assistant works. `index` is 1-based and
/// strictly increasing within a turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThinkingStep {
    pub step: String,
    pub index: u32,
}

/// A named capability the assistant invoked with a query string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    pub tool: String,
    pub query: String,
}

/// File descriptor returned by the upload collaborator; immutable once attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub size: u64,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Code,
    Document,
    Chart,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Code => "code",
            ArtifactType::Document => "document",
            ArtifactType::Chart => "chart",
        }
    }
}

/// A structured side-product of a turn (code, document, chart). Created exactly
/// once per `artifact_created` event and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: String,
    pub kind: ArtifactType,
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(
        id: String,
        kind: ArtifactType,
        title: Option<String>,
        content: String,
        language: Option<String>,
    ) -> Self {
        let title = title.unwrap_or_else(|| format!("Generated {}", kind.as_str()));
        Self { id, kind, title, content, language, created_at: Utc::now() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    Complete,
    Stop,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub thinking_steps: Vec<ThinkingStep>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl Message {
    /// A user message is complete and immutable from the moment it is built.
    pub fn user(conversation_id: String, content: String, attachments: Vec<Attachment>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id,
            role: MessageRole::User,
            content,
            timestamp: Utc::now(),
            attachments,
            thinking_steps: Vec::new(),
            tool_calls: Vec::new(),
            artifact_id: None,
            finish_reason: None,
        }
    }

    /// The empty assistant shell created at `message_start`; mutated in place by
    /// the turn controller until `message_end` freezes it.
    pub fn assistant_shell(id: String, conversation_id: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            conversation_id,
            role: MessageRole::Assistant,
            content: String::new(),
            timestamp,
            attachments: Vec::new(),
            thinking_steps: Vec::new(),
            tool_calls: Vec::new(),
            artifact_id: None,
            finish_reason: None,
        }
    }
}
