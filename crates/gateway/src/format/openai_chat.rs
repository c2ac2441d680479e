//! OpenAI chat-completions request and response types.
//!
//! The field set mirrors the [OpenAI API reference](https://platform.openai.com/docs/api-reference/chat);
//! anything not modeled here survives through `unknown_fields`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::unknown_fields::UnknownFields;

/// Top-level request fields with dedicated struct members. Everything else
/// belongs to the extras bag.
pub const KNOWN_REQUEST_FIELDS: &[&str] = &[
    "model",
    "messages",
    "stream",
    "max_tokens",
    "max_completion_tokens",
    "temperature",
    "top_p",
    "stop",
    "tools",
    "tool_choice",
    "user",
];

/// Request body for the chat completions endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionRequest {
    /// The model to use for the completion.
    pub model: String,

    /// Conversation messages in chronological order.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,

    /// When true, the response is delivered as Server-Sent Events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Legacy completion token cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Preferred completion token cap, superseding `max_tokens`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,

    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Stop sequence or list of stop sequences.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,

    /// Tools the model may call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    /// Directive controlling if and how the model must use tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    /// End-user identifier forwarded for abuse detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Additional fields preserved for lossless passthrough.
    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

impl ChatCompletionRequest {
    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// Effective completion token cap, preferring the newer field name.
    pub fn completion_token_cap(&self) -> Option<u32> {
        self.max_completion_tokens.or(self.max_tokens)
    }
}

/// Stop sequences accepted either as one string or as a list.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum StopSequences {
    One(String),
    Many(Vec<String>),
}

impl StopSequences {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(stop) => vec![stop],
            Self::Many(stops) => stops,
        }
    }
}

/// One conversation message.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChatMessage {
    /// Sender role: `system`, `user`, `assistant` or `tool`.
    #[serde(default)]
    pub role: String,

    /// Message content, either a plain string or content parts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,

    /// Optional participant name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tool calls made by the assistant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// ID of the tool call this message responds to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Additional fields preserved for lossless passthrough.
    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

impl ChatMessage {
    /// Flattened text of the message, concatenating text parts when the
    /// content is a part list.
    pub fn text(&self) -> String {
        match &self.content {
            Some(MessageContent::Text(text)) => text.clone(),
            Some(MessageContent::Parts(parts)) => parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect(),
            None => String::new(),
        }
    }
}

/// Message content, a plain string or an array of content parts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<Value>),
}

/// One tool call, complete or as a streaming delta.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolCall {
    /// Delta position, present only in streaming chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCall>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

/// Function name and serialized arguments of a tool call.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

/// Tool definition offered to the model.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: String,

    pub function: FunctionDefinition,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

/// Function schema within a tool definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

/// Response body of the chat completions endpoint, also used for the typed
/// view over streaming chunks.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChatCompletionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// `chat.completion` or `chat.completion.chunk`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default)]
    pub choices: Vec<ChatChoice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

impl ChatCompletionResponse {
    pub fn is_chunk(&self) -> bool {
        self.object.as_deref() == Some("chat.completion.chunk")
    }

    /// Some providers return `finish_reason: "stop"` (or nothing) on responses
    /// that carry tool calls; clients relying on the documented contract break
    /// on that, so the reason is rewritten to `tool_calls`.
    pub fn repair_finish_reasons(&mut self) {
        for choice in &mut self.choices {
            let has_tool_calls = choice
                .message
                .as_ref()
                .and_then(|message| message.tool_calls.as_ref())
                .is_some_and(|calls| !calls.is_empty());

            if has_tool_calls && matches!(choice.finish_reason.as_deref(), None | Some("") | Some("stop")) {
                choice.finish_reason = Some("tool_calls".to_string());
            }
        }
    }
}

/// One response choice, holding a full message or a streaming delta.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub index: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<ChatMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

/// Token usage block.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens_details: Option<PromptTokensDetails>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

/// Prompt token detail block carrying the cache-read count.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PromptTokensDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

/// Whether a raw SSE payload is a chat-completion chunk.
pub fn is_chunk_object(raw: &Map<String, Value>) -> bool {
    raw.get("object").and_then(Value::as_str) == Some("chat.completion.chunk")
}
