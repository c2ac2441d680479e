//! Managed request/response views over raw JSON bodies.
//!
//! The pipeline moves bodies around as raw JSON objects; plugins that need
//! structure parse them into a managed variant, mutate it, and serialize it
//! back. The extras bag on every variant keeps the cycle lossless.

use serde_json::{Map, Value};

use super::{JsonMap, anthropic, openai_chat, openai_responses};
use crate::error::{GatewayError, GatewayResult};

/// The three request styles the gateway speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestFormat {
    OpenAiChat,
    OpenAiResponses,
    Anthropic,
}

/// A parsed, mutation-friendly view over a provider-format request body.
#[derive(Debug, Clone)]
pub enum ManagedRequest {
    OpenAiChat(openai_chat::ChatCompletionRequest),
    OpenAiResponses(openai_responses::ResponsesRequest),
    Anthropic(anthropic::MessagesRequest),
}

impl ManagedRequest {
    /// Parses a raw body into the given format.
    pub fn parse(format: RequestFormat, raw: &JsonMap) -> GatewayResult<Self> {
        let value = Value::Object(raw.clone());

        let parsed = match format {
            RequestFormat::OpenAiChat => serde_json::from_value(value).map(Self::OpenAiChat),
            RequestFormat::OpenAiResponses => serde_json::from_value(value).map(Self::OpenAiResponses),
            RequestFormat::Anthropic => serde_json::from_value(value).map(Self::Anthropic),
        };

        parsed.map_err(|e| GatewayError::InvalidRequest(format!("Failed to parse request body: {e}")))
    }

    pub fn format(&self) -> RequestFormat {
        match self {
            Self::OpenAiChat(_) => RequestFormat::OpenAiChat,
            Self::OpenAiResponses(_) => RequestFormat::OpenAiResponses,
            Self::Anthropic(_) => RequestFormat::Anthropic,
        }
    }

    /// Serializes back into a raw body.
    pub fn to_map(&self) -> GatewayResult<JsonMap> {
        let value = match self {
            Self::OpenAiChat(request) => serde_json::to_value(request),
            Self::OpenAiResponses(request) => serde_json::to_value(request),
            Self::Anthropic(request) => serde_json::to_value(request),
        };

        match value {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(GatewayError::Internal("request serialized to a non-object".into())),
            Err(e) => Err(GatewayError::Internal(format!("Failed to serialize request: {e}"))),
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Self::OpenAiChat(request) => &request.model,
            Self::OpenAiResponses(request) => &request.model,
            Self::Anthropic(request) => &request.model,
        }
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        let model = model.into();

        match self {
            Self::OpenAiChat(request) => request.model = model,
            Self::OpenAiResponses(request) => request.model = model,
            Self::Anthropic(request) => request.model = model,
        }
    }

    pub fn is_streaming(&self) -> bool {
        match self {
            Self::OpenAiChat(request) => request.is_streaming(),
            Self::OpenAiResponses(request) => request.is_streaming(),
            Self::Anthropic(request) => request.is_streaming(),
        }
    }

    /// Conversation messages as raw values, in chronological order.
    pub fn messages(&self) -> GatewayResult<Vec<Value>> {
        let values = match self {
            Self::OpenAiChat(request) => request
                .messages
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<Vec<_>, _>>(),
            Self::Anthropic(request) => request
                .messages
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<Vec<_>, _>>(),
            Self::OpenAiResponses(request) => Ok(request.input_items()),
        };

        values.map_err(|e| GatewayError::Internal(format!("Failed to serialize messages: {e}")))
    }

    /// Replaces the conversation messages from raw values.
    pub fn set_messages(&mut self, messages: Vec<Value>) -> GatewayResult<()> {
        match self {
            Self::OpenAiChat(request) => {
                request.messages = parse_messages(messages)?;
            }
            Self::Anthropic(request) => {
                request.messages = parse_messages(messages)?;
            }
            Self::OpenAiResponses(request) => {
                request.input = Some(openai_responses::ResponsesInput::Items(messages));
            }
        }

        Ok(())
    }

    /// Folds unknown top-level fields from another raw body in. Known fields
    /// are skipped and existing extras win.
    pub fn merge_from(&mut self, raw: &JsonMap) {
        match self {
            Self::OpenAiChat(request) => request
                .unknown_fields
                .merge_from(raw, openai_chat::KNOWN_REQUEST_FIELDS),
            Self::OpenAiResponses(request) => request
                .unknown_fields
                .merge_from(raw, openai_responses::KNOWN_REQUEST_FIELDS),
            Self::Anthropic(request) => request
                .unknown_fields
                .merge_from(raw, anthropic::KNOWN_REQUEST_FIELDS),
        }
    }
}

/// Normalized token usage across formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
}

/// One choice synthesized across formats.
#[derive(Debug, Clone, Default)]
pub struct BuiltChoice {
    pub index: u32,
    pub role: String,
    pub content: String,
    pub tool_calls: Vec<Value>,
    pub finish_reason: Option<String>,
}

/// A parsed view over a provider-format response body or stream chunk.
#[derive(Debug, Clone)]
pub enum ManagedResponse {
    OpenAiChat(openai_chat::ChatCompletionResponse),
    OpenAiResponses(openai_responses::ResponsesResponse),
    Anthropic(anthropic::MessagesResponse),
}

impl ManagedResponse {
    /// Parses a raw response body. Chat-completion responses get their finish
    /// reasons repaired as part of parsing.
    pub fn parse(format: RequestFormat, raw: &JsonMap) -> GatewayResult<Self> {
        let value = Value::Object(raw.clone());

        let parsed = match format {
            RequestFormat::OpenAiChat => serde_json::from_value(value).map(|mut response: openai_chat::ChatCompletionResponse| {
                response.repair_finish_reasons();
                Self::OpenAiChat(response)
            }),
            RequestFormat::OpenAiResponses => serde_json::from_value(value).map(Self::OpenAiResponses),
            RequestFormat::Anthropic => serde_json::from_value(value).map(Self::Anthropic),
        };

        parsed.map_err(|e| GatewayError::UpstreamParse(format!("Failed to parse response body: {e}")))
    }

    pub fn to_map(&self) -> GatewayResult<JsonMap> {
        let value = match self {
            Self::OpenAiChat(response) => serde_json::to_value(response),
            Self::OpenAiResponses(response) => serde_json::to_value(response),
            Self::Anthropic(response) => serde_json::to_value(response),
        };

        match value {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(GatewayError::Internal("response serialized to a non-object".into())),
            Err(e) => Err(GatewayError::Internal(format!("Failed to serialize response: {e}"))),
        }
    }

    pub fn model(&self) -> Option<&str> {
        match self {
            Self::OpenAiChat(response) => response.model.as_deref(),
            Self::OpenAiResponses(response) => response.model.as_deref(),
            Self::Anthropic(response) => response.model.as_deref(),
        }
    }

    /// Whether this body is a streaming chunk rather than a full response.
    pub fn is_chunk(&self) -> bool {
        match self {
            Self::OpenAiChat(response) => response.is_chunk(),
            Self::OpenAiResponses(response) => response
                .object
                .as_deref()
                .is_none_or(|object| object != "response"),
            Self::Anthropic(response) => response
                .kind
                .as_deref()
                .is_some_and(|kind| kind != "message"),
        }
    }

    /// Normalized token usage, zeroed when the body carries none.
    pub fn usage(&self) -> TokenUsage {
        match self {
            Self::OpenAiChat(response) => {
                let Some(usage) = &response.usage else {
                    return TokenUsage::default();
                };

                let prompt = usage.prompt_tokens.unwrap_or(0);
                let completion = usage.completion_tokens.unwrap_or(0);

                TokenUsage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: usage.total_tokens.unwrap_or(prompt + completion),
                    cache_read_tokens: usage
                        .prompt_tokens_details
                        .as_ref()
                        .and_then(|details| details.cached_tokens)
                        .unwrap_or(0),
                    cache_creation_tokens: 0,
                }
            }
            Self::OpenAiResponses(response) => {
                let Some(usage) = &response.usage else {
                    return TokenUsage::default();
                };

                let prompt = usage.input_tokens.unwrap_or(0);
                let completion = usage.output_tokens.unwrap_or(0);

                TokenUsage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: usage.total_tokens.unwrap_or(prompt + completion),
                    cache_read_tokens: usage
                        .input_tokens_details
                        .as_ref()
                        .and_then(|details| details.cached_tokens)
                        .unwrap_or(0),
                    cache_creation_tokens: 0,
                }
            }
            Self::Anthropic(response) => {
                let Some(usage) = &response.usage else {
                    return TokenUsage::default();
                };

                let prompt = usage.input_tokens.unwrap_or(0);
                let completion = usage.output_tokens.unwrap_or(0);

                TokenUsage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: prompt + completion,
                    cache_read_tokens: usage.cache_read_input_tokens.unwrap_or(0),
                    cache_creation_tokens: usage.cache_creation_input_tokens.unwrap_or(0),
                }
            }
        }
    }

    /// Choices synthesized across formats. Anthropic and Responses bodies
    /// yield a single choice built from their content.
    pub fn choices(&self) -> Vec<BuiltChoice> {
        match self {
            Self::OpenAiChat(response) => response
                .choices
                .iter()
                .map(|choice| {
                    let message = choice.message.as_ref().or(choice.delta.as_ref());

                    BuiltChoice {
                        index: choice.index,
                        role: message
                            .map(|message| message.role.clone())
                            .filter(|role| !role.is_empty())
                            .unwrap_or_else(|| "assistant".to_string()),
                        content: message.map(|message| message.text()).unwrap_or_default(),
                        tool_calls: message
                            .and_then(|message| message.tool_calls.as_ref())
                            .map(|calls| {
                                calls
                                    .iter()
                                    .filter_map(|call| serde_json::to_value(call).ok())
                                    .collect()
                            })
                            .unwrap_or_default(),
                        finish_reason: choice.finish_reason.clone(),
                    }
                })
                .collect(),
            Self::Anthropic(response) => {
                let converted = convert_anthropic_choice(response);
                vec![converted]
            }
            Self::OpenAiResponses(response) => vec![BuiltChoice {
                index: 0,
                role: "assistant".to_string(),
                content: response.output_text(),
                tool_calls: response
                    .output
                    .iter()
                    .filter(|item| item.get("type").and_then(Value::as_str) == Some("function_call"))
                    .cloned()
                    .collect(),
                finish_reason: response.status.clone(),
            }],
        }
    }
}

fn convert_anthropic_choice(response: &anthropic::MessagesResponse) -> BuiltChoice {
    let converted = super::convert::anthropic_response_to_chat(response);
    let choice = converted.choices.into_iter().next().unwrap_or_default();
    let message = choice.message.unwrap_or_default();

    let role = if message.role.is_empty() {
        "assistant".to_string()
    } else {
        message.role.clone()
    };

    BuiltChoice {
        index: 0,
        role,
        content: message.text(),
        tool_calls: message
            .tool_calls
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|call| serde_json::to_value(call).ok())
                    .collect()
            })
            .unwrap_or_default(),
        finish_reason: choice.finish_reason,
    }
}

fn parse_messages<T: serde::de::DeserializeOwned>(messages: Vec<Value>) -> GatewayResult<Vec<T>> {
    messages
        .into_iter()
        .map(|message| {
            serde_json::from_value(message)
                .map_err(|e| GatewayError::InvalidRequest(format!("Invalid message: {e}")))
        })
        .collect()
}

/// Parses raw bytes into a JSON object body.
pub fn parse_body(bytes: &[u8]) -> GatewayResult<JsonMap> {
    let value: Value = sonic_rs::from_slice(bytes)
        .map_err(|e| GatewayError::InvalidRequest(format!("Malformed request JSON: {e}")))?;

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(GatewayError::InvalidRequest("Request body must be a JSON object".into())),
    }
}

/// Serializes a raw body back to bytes.
pub fn serialize_body(map: &Map<String, Value>) -> GatewayResult<Vec<u8>> {
    sonic_rs::to_vec(map).map_err(|e| GatewayError::Internal(format!("Failed to serialize body: {e}")))
}
