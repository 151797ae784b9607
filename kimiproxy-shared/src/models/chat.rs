use serde::{Deserialize, Serialize};

pub const OBJECT_CHUNK: &str = "chat.completion.chunk";
pub const OBJECT_MODEL: &str = "model";
pub const OBJECT_LIST: &str = "list";

/// One message of the inbound OpenAI-style conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatCompletionMessage {
    pub role: String,
    pub content: String,
}

/// Request body for `POST /v1/chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatCompletionRequest {
    pub messages: Vec<ChatCompletionMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Caller identity; doubles as a session key when `session_id` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatCompletionChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatCompletionChunkChoice {
    pub index: u32,
    pub delta: ChatCompletionChunkDelta,
    pub finish_reason: Option<String>,
}

/// One SSE frame payload of a simulated completion stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatCompletionChunkChoice>,
}

impl ChatCompletionChunk {
    /// A chunk carrying one content delta.
    #[must_use]
    pub fn delta(id: &str, created: i64, model: &str, content: String) -> Self {
        Self::build(id, created, model, Some(content), None)
    }

    /// The terminal empty-delta chunk closing a stream.
    #[must_use]
    pub fn finish(id: &str, created: i64, model: &str, finish_reason: &str) -> Self {
        Self::build(id, created, model, None, Some(finish_reason.to_string()))
    }

    /// A content chunk that also carries a finish reason, used when a failed
    /// upstream call degrades to a single terminal message.
    #[must_use]
    pub fn terminal_content(
        id: &str,
        created: i64,
        model: &str,
        content: String,
        finish_reason: &str,
    ) -> Self {
        Self::build(
            id,
            created,
            model,
            Some(content),
            Some(finish_reason.to_string()),
        )
    }

    fn build(
        id: &str,
        created: i64,
        model: &str,
        content: Option<String>,
        finish_reason: Option<String>,
    ) -> Self {
        Self {
            id: id.to_string(),
            object: OBJECT_CHUNK.to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChatCompletionChunkChoice {
                index: 0,
                delta: ChatCompletionChunkDelta { content },
                finish_reason,
            }],
        }
    }
}

/// One entry of the `/v1/models` listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Model {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

/// Response body for `GET /v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<Model>,
}
