//! OpenAI Responses API request and response types.
//!
//! The Responses API carries its conversation as `input` items and its result
//! as `output` items. Items are structurally diverse, so they are kept as raw
//! values; only the envelope is typed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::unknown_fields::UnknownFields;

/// Top-level request fields with dedicated struct members.
pub const KNOWN_REQUEST_FIELDS: &[&str] = &[
    "model",
    "input",
    "instructions",
    "max_output_tokens",
    "temperature",
    "top_p",
    "stream",
    "tools",
    "tool_choice",
    "metadata",
    "user",
];

/// Request body for the Responses API.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResponsesRequest {
    /// The model to use.
    pub model: String,

    /// Conversation input, plain text or a list of items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<ResponsesInput>,

    /// System-level instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Output token cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// When true, deliver response events over SSE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Additional fields preserved for lossless passthrough.
    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

impl ResponsesRequest {
    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// Conversation input as message-shaped items. A plain-text input becomes
    /// a single user message item.
    pub fn input_items(&self) -> Vec<Value> {
        match &self.input {
            Some(ResponsesInput::Text(text)) => vec![json!({"role": "user", "content": text})],
            Some(ResponsesInput::Items(items)) => items.clone(),
            None => Vec::new(),
        }
    }
}

/// Conversation input, plain text or structured items.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ResponsesInput {
    Text(String),
    Items(Vec<Value>),
}

/// Response body of the Responses API.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResponsesResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Always `response` for complete bodies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Output items (messages, tool calls, reasoning blocks).
    #[serde(default)]
    pub output: Vec<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponsesUsage>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

impl ResponsesResponse {
    /// Concatenated text of all output message items.
    pub fn output_text(&self) -> String {
        self.output
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("message"))
            .filter_map(|item| item.get("content").and_then(Value::as_array))
            .flatten()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect()
    }
}

/// Token usage block of the Responses API.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResponsesUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens_details: Option<ResponsesTokenDetails>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

/// Input token detail block carrying the cache-read count.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResponsesTokenDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

/// Whether a raw SSE payload is a Responses API stream event.
pub fn is_chunk_object(raw: &Map<String, Value>) -> bool {
    raw.get("type")
        .and_then(Value::as_str)
        .is_some_and(|kind| kind.starts_with("response."))
}
