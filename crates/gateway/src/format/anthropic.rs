//! Anthropic Messages API request and response types.
//!
//! Modeled after the [Messages API reference](https://docs.anthropic.com/en/api/messages);
//! undocumented fields survive through `unknown_fields`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::unknown_fields::UnknownFields;

/// Top-level request fields with dedicated struct members.
pub const KNOWN_REQUEST_FIELDS: &[&str] = &[
    "model",
    "messages",
    "max_tokens",
    "system",
    "temperature",
    "top_p",
    "top_k",
    "stop_sequences",
    "stream",
    "metadata",
    "tools",
    "tool_choice",
];

/// Request body for the Messages API.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessagesRequest {
    /// The model that will complete the prompt.
    pub model: String,

    /// Conversation turns supplied to the Messages API.
    #[serde(default)]
    pub messages: Vec<InputMessage>,

    /// Maximum output tokens the provider may generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// System prompt providing global instructions for the assistant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,

    /// Sampling temperature controlling randomness.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Probability mass cutoff used for nucleus sampling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Top-K sampling limit that constrains candidate tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    /// Custom strings that cause generation to stop when produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    /// When true, deliver a Server-Sent Events stream instead of a single body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Optional metadata describing the end user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    /// Tool specifications the model may call during this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    /// Directive controlling if and how the model must use tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    /// Additional undocumented fields preserved for forward compatibility.
    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

impl MessagesRequest {
    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }
}

/// System prompt payload, plain text or content blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<Value>),
}

/// One conversation turn.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputMessage {
    /// `user` or `assistant`.
    pub role: String,

    /// Message content, plain text or content blocks.
    pub content: InputContent,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

impl InputMessage {
    /// Flattened text of the turn, concatenating text blocks.
    pub fn text(&self) -> String {
        match &self.content {
            InputContent::Text(text) => text.clone(),
            InputContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text, .. } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// Message content, plain text or an array of content blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum InputContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// One content block of a message or response.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,

        #[serde(flatten)]
        unknown_fields: UnknownFields,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,

        #[serde(flatten)]
        unknown_fields: UnknownFields,
    },
    ToolResult {
        tool_use_id: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<Value>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,

        #[serde(flatten)]
        unknown_fields: UnknownFields,
    },
    /// Any block type not modeled above, kept verbatim.
    #[serde(untagged)]
    Unknown(Value),
}

/// Optional metadata forwarded with the request.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Metadata {
    /// External identifier for the end user associated with this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Additional metadata keys retained for compatibility.
    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

/// Tool definition in Anthropic format.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Tool {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

/// Response body of the Messages API.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MessagesResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// `message` for complete responses, event names for stream frames.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default)]
    pub content: Vec<ContentBlock>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

/// Billing usage block.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

/// Stream event types that carry message deltas.
const CHUNK_EVENT_TYPES: &[&str] = &["content_block_delta", "content_block_start", "message_delta"];

/// Whether a raw SSE payload is an Anthropic stream chunk.
pub fn is_chunk_object(raw: &Map<String, Value>) -> bool {
    raw.get("type")
        .and_then(Value::as_str)
        .is_some_and(|kind| CHUNK_EVENT_TYPES.contains(&kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_unknown_fields() {
        let source = json!({
            "model": "claude-3-haiku",
            "max_tokens": 1024,
            "messages": [
                {"role": "user", "content": "hello", "cache_hint": "aggressive"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "hi", "citations": []},
                    {"type": "thinking", "thinking": "...", "signature": "abc"},
                ]},
            ],
            "service_tier": "auto",
        });

        let request: MessagesRequest = serde_json::from_value(source.clone()).unwrap();
        assert_eq!(request.unknown_fields.get("service_tier"), Some(&json!("auto")));
        assert_eq!(
            request.messages[0].unknown_fields.get("cache_hint"),
            Some(&json!("aggressive"))
        );

        let output = serde_json::to_value(&request).unwrap();
        assert_eq!(output, source);
    }

    #[test]
    fn unmodeled_blocks_survive_verbatim() {
        let block = json!({"type": "thinking", "thinking": "hmm", "signature": "s"});

        let parsed: ContentBlock = serde_json::from_value(block.clone()).unwrap();
        assert!(matches!(parsed, ContentBlock::Unknown(_)));

        assert_eq!(serde_json::to_value(&parsed).unwrap(), block);
    }

    #[test]
    fn detects_stream_chunks() {
        for kind in ["content_block_delta", "content_block_start", "message_delta"] {
            let raw = json!({"type": kind});
            assert!(is_chunk_object(raw.as_object().unwrap()), "{kind} should be a chunk");
        }

        let full = json!({"type": "message"});
        assert!(!is_chunk_object(full.as_object().unwrap()));
    }

    #[test]
    fn joins_text_blocks() {
        let message: InputMessage = serde_json::from_value(json!({
            "role": "assistant",
            "content": [
                {"type": "text", "text": "one "},
                {"type": "tool_use", "id": "t1", "name": "f", "input": {}},
                {"type": "text", "text": "two"},
            ],
        }))
        .unwrap();

        assert_eq!(message.text(), "one two");
    }
}
