use serde::{Deserialize, Serialize};
use tracing::error;

use crate::errors::ApiError;
use crate::models::{Attachment, Conversation, Message};

/// A conversation together with its messages, as returned by
/// `GET /conversations/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub conversation: Conversation,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Acknowledgement for a submitted user message. Acceptance of this call is
/// what moves a server-push turn from Sending to Streaming.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendAck {
    pub message_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
struct CreateConversationBody<'a> {
    title: &'a str,
}

#[derive(Debug, Serialize)]
struct SendMessageBody<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachments: Option<&'a [Attachment]>,
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    success: bool,
}

/// HTTP client for the persistence collaborator (conversations, messages,
/// uploads). Streaming is not handled here — see [`crate::transport`].
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base: base.into() }
    }

    /// Reuse an existing `reqwest::Client` (connection pool) for this API base.
    pub fn with_client(http: reqwest::Client, base: impl Into<String>) -> Self {
        Self { http, base: base.into() }
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let resp = self
            .http
            .get(format!("{}/conversations", self.base))
            .send()
            .await?;
        Self::json_body(resp).await
    }

    pub async fn get_conversation(&self, id: &str) -> Result<ConversationDetail, ApiError> {
        let resp = self
            .http
            .get(format!("{}/conversations/{id}", self.base))
            .send()
            .await?;
        Self::json_body(resp).await
    }

    pub async fn create_conversation(&self, title: &str) -> Result<Conversation, ApiError> {
        let resp = self
            .http
            .post(format!("{}/conversations", self.base))
            .json(&CreateConversationBody { title })
            .send()
            .await?;
        Self::json_body(resp).await
    }

    /// Deletes a conversation (the server cascades to its messages and
    /// artifacts). Returns the server's `success` flag.
    pub async fn delete_conversation(&self, id: &str) -> Result<bool, ApiError> {
        let resp = self
            .http
            .delete(format!("{}/conversations/{id}", self.base))
            .send()
            .await?;
        let body: DeleteResponse = Self::json_body(resp).await?;
        Ok(body.success)
    }

    /// Submits a user message out-of-band before the stream is opened.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
        attachments: &[Attachment],
    ) -> Result<SendAck, ApiError> {
        let body = SendMessageBody {
            content,
            attachments: if attachments.is_empty() { None } else { Some(attachments) },
        };
        let resp = self
            .http
            .post(format!("{}/conversations/{conversation_id}/messages", self.base))
            .json(&body)
            .send()
            .await?;
        Self::json_body(resp).await
    }

    /// Uploads a file (multipart field `file`) and returns its descriptor.
    pub async fn upload(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Attachment, ApiError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let resp = self
            .http
            .post(format!("{}/upload", self.base))
            .multipart(form)
            .send()
            .await?;
        Self::json_body(resp).await
    }

    /// Checks the status, then parses the JSON body. Non-2xx responses become
    /// [`ApiError::Status`] carrying the server's message when one is readable.
    async fn json_body<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .text()
                .await
                .unwrap_or_else(|_| "request failed".to_string());
            error!("API request failed with {status}: {message}");
            return Err(ApiError::Status { status: status.as_u16(), message });
        }
        resp.json::<T>()
            .await
            .map_err(|e| ApiError::Parse { detail: e.to_string() })
    }
}
