//! Cross-format converters.
//!
//! Conversions between the OpenAI chat style and the Anthropic messages style
//! transform only the fields that differ between the two APIs; everything
//! else is copied through the extras bags untouched.

use serde_json::{Value, json};

use super::{anthropic, openai_chat};

/// Anthropic requires `max_tokens`; this cap applies when the OpenAI request
/// did not carry one.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Token cap for Anthropic when the OpenAI request set none.
fn effective_max_tokens(request: &openai_chat::ChatCompletionRequest) -> u32 {
    request.completion_token_cap().unwrap_or(DEFAULT_MAX_TOKENS)
}

/// Converts an OpenAI chat-completions request into an Anthropic messages
/// request.
///
/// System messages move from the messages array to the top-level `system`
/// field; tool definitions are re-shaped; `stop` becomes `stop_sequences`;
/// `user` becomes `metadata.user_id`.
pub fn chat_request_to_anthropic(request: &openai_chat::ChatCompletionRequest) -> anthropic::MessagesRequest {
    let mut system_parts = Vec::new();
    let mut messages = Vec::new();

    for message in &request.messages {
        if message.role == "system" {
            system_parts.push(message.text());
            continue;
        }

        messages.push(anthropic::InputMessage {
            role: message.role.clone(),
            content: chat_message_content(message),
            unknown_fields: message.unknown_fields.clone(),
        });
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(anthropic::SystemPrompt::Text(system_parts.join("\n")))
    };

    let tools = request.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|tool| anthropic::Tool {
                name: tool.function.name.clone(),
                description: tool.function.description.clone(),
                input_schema: tool.function.parameters.clone(),
                unknown_fields: Default::default(),
            })
            .collect()
    });

    let metadata = request.user.as_ref().map(|user| anthropic::Metadata {
        user_id: Some(user.clone()),
        unknown_fields: Default::default(),
    });

    anthropic::MessagesRequest {
        model: request.model.clone(),
        messages,
        max_tokens: Some(effective_max_tokens(request)),
        system,
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: None,
        stop_sequences: request.stop.clone().map(openai_chat::StopSequences::into_vec),
        stream: request.stream,
        metadata,
        tools,
        tool_choice: request.tool_choice.clone(),
        unknown_fields: request.unknown_fields.clone(),
    }
}

fn chat_message_content(message: &openai_chat::ChatMessage) -> anthropic::InputContent {
    match &message.content {
        Some(openai_chat::MessageContent::Text(text)) => anthropic::InputContent::Text(text.clone()),
        Some(openai_chat::MessageContent::Parts(parts)) => anthropic::InputContent::Blocks(
            parts
                .iter()
                .map(|part| serde_json::from_value(part.clone()).unwrap_or(anthropic::ContentBlock::Unknown(part.clone())))
                .collect(),
        ),
        None => anthropic::InputContent::Text(String::new()),
    }
}

/// Converts an Anthropic messages response into an OpenAI chat-completions
/// response.
///
/// Text blocks concatenate into the assistant message; `tool_use` blocks
/// become tool calls with JSON-serialized arguments; `stop_reason` maps onto
/// the OpenAI finish reasons.
pub fn anthropic_response_to_chat(response: &anthropic::MessagesResponse) -> openai_chat::ChatCompletionResponse {
    let mut content = String::new();
    let mut tool_calls = Vec::new();

    for block in &response.content {
        match block {
            anthropic::ContentBlock::Text { text, .. } => content.push_str(text),
            anthropic::ContentBlock::ToolUse { id, name, input, .. } => {
                tool_calls.push(openai_chat::ToolCall {
                    index: None,
                    id: Some(id.clone()),
                    kind: Some("function".to_string()),
                    function: Some(openai_chat::FunctionCall {
                        name: Some(name.clone()),
                        arguments: Some(input.to_string()),
                        unknown_fields: Default::default(),
                    }),
                    unknown_fields: Default::default(),
                });
            }
            _ => {}
        }
    }

    let message = openai_chat::ChatMessage {
        role: response.role.clone().unwrap_or_else(|| "assistant".to_string()),
        content: Some(openai_chat::MessageContent::Text(content)),
        name: None,
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        tool_call_id: None,
        unknown_fields: Default::default(),
    };

    let usage = response.usage.as_ref().map(|usage| {
        let prompt = usage.input_tokens.unwrap_or(0);
        let completion = usage.output_tokens.unwrap_or(0);

        openai_chat::Usage {
            prompt_tokens: Some(prompt),
            completion_tokens: Some(completion),
            total_tokens: Some(prompt + completion),
            prompt_tokens_details: usage.cache_read_input_tokens.map(|cached| openai_chat::PromptTokensDetails {
                cached_tokens: Some(cached),
                unknown_fields: Default::default(),
            }),
            unknown_fields: Default::default(),
        }
    });

    let mut converted = openai_chat::ChatCompletionResponse {
        id: response.id.clone(),
        object: Some("chat.completion".to_string()),
        created: None,
        model: response.model.clone(),
        choices: vec![openai_chat::ChatChoice {
            index: 0,
            message: Some(message),
            delta: None,
            finish_reason: response.stop_reason.as_deref().map(map_stop_reason),
            unknown_fields: Default::default(),
        }],
        usage,
        unknown_fields: response.unknown_fields.clone(),
    };

    converted.repair_finish_reasons();
    converted
}

/// Maps an Anthropic stop reason onto the OpenAI finish-reason vocabulary.
pub fn map_stop_reason(stop_reason: &str) -> String {
    match stop_reason {
        "end_turn" | "stop_sequence" => "stop".to_string(),
        "max_tokens" => "length".to_string(),
        "tool_use" => "tool_calls".to_string(),
        other => other.to_string(),
    }
}

/// Builds the `[role]: content` transcript used by summarization prompts.
pub fn transcript(messages: &[Value]) -> String {
    let mut out = String::new();

    for message in messages {
        let role = message.get("role").and_then(Value::as_str).unwrap_or("user");
        out.push('[');
        out.push_str(role);
        out.push_str("]: ");
        out.push_str(&message_text(message));
        out.push_str("\n\n");
    }

    out
}

/// Flattened text of a raw message value, joining text parts when the content
/// is a block list.
pub fn message_text(message: &Value) -> String {
    match message.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect(),
        _ => String::new(),
    }
}

/// Synthetic pair replacing a compacted conversation slice.
pub fn summary_messages(summary: &str) -> Vec<Value> {
    vec![
        json!({
            "role": "user",
            "content": format!("[Previous conversation summary]\n{summary}"),
        }),
        json!({
            "role": "assistant",
            "content": "Understood. I have the conversation context and will continue from here.",
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn anthropic_response_converts_to_chat() {
        let response: anthropic::MessagesResponse = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "hi"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 3, "output_tokens": 1},
        }))
        .unwrap();

        let converted = anthropic_response_to_chat(&response);

        let choice = &converted.choices[0];
        assert_eq!(choice.message.as_ref().unwrap().role, "assistant");
        assert_eq!(choice.message.as_ref().unwrap().text(), "hi");
        assert_eq!(choice.finish_reason.as_deref(), Some("stop"));

        let usage = converted.usage.unwrap();
        assert_eq!(usage.prompt_tokens, Some(3));
        assert_eq!(usage.completion_tokens, Some(1));
        assert_eq!(usage.total_tokens, Some(4));
    }

    #[test]
    fn tool_use_becomes_tool_call() {
        let response: anthropic::MessagesResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "calling"},
                {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Paris"}},
            ],
            "stop_reason": "tool_use",
        }))
        .unwrap();

        let converted = anthropic_response_to_chat(&response);
        let message = converted.choices[0].message.as_ref().unwrap();

        let calls = message.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id.as_deref(), Some("toolu_1"));
        assert_eq!(calls[0].kind.as_deref(), Some("function"));

        let function = calls[0].function.as_ref().unwrap();
        assert_eq!(function.name.as_deref(), Some("get_weather"));
        assert_eq!(
            serde_json::from_str::<Value>(function.arguments.as_ref().unwrap()).unwrap(),
            json!({"city": "Paris"})
        );

        assert_eq!(converted.choices[0].finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn chat_request_extracts_system_messages() {
        let request: openai_chat::ChatCompletionRequest = serde_json::from_value(json!({
            "model": "claude-3-haiku",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "system", "content": "no emoji"},
                {"role": "user", "content": "hello"},
            ],
            "stop": "END",
            "user": "u-123",
        }))
        .unwrap();

        let converted = chat_request_to_anthropic(&request);

        assert!(matches!(
            converted.system,
            Some(anthropic::SystemPrompt::Text(ref text)) if text == "be terse\nno emoji"
        ));
        assert_eq!(converted.messages.len(), 1);
        assert_eq!(converted.messages[0].role, "user");
        assert_eq!(converted.max_tokens, Some(4096));
        assert_eq!(converted.stop_sequences, Some(vec!["END".to_string()]));
        assert_eq!(converted.metadata.unwrap().user_id.as_deref(), Some("u-123"));
    }

    #[test]
    fn chat_request_maps_tools_and_token_cap() {
        let request: openai_chat::ChatCompletionRequest = serde_json::from_value(json!({
            "model": "claude-3-haiku",
            "messages": [{"role": "user", "content": "hi"}],
            "max_completion_tokens": 512,
            "tools": [{"type": "function", "function": {
                "name": "add",
                "description": "adds numbers",
                "parameters": {"type": "object"},
            }}],
        }))
        .unwrap();

        let converted = chat_request_to_anthropic(&request);

        assert_eq!(converted.max_tokens, Some(512));

        let tools = converted.tools.unwrap();
        assert_eq!(tools[0].name, "add");
        assert_eq!(tools[0].description.as_deref(), Some("adds numbers"));
        assert_eq!(tools[0].input_schema, Some(json!({"type": "object"})));
    }

    #[test]
    fn unknown_request_fields_copy_through() {
        let request: openai_chat::ChatCompletionRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}],
            "weird_flag": true,
        }))
        .unwrap();

        let converted = chat_request_to_anthropic(&request);

        assert_eq!(converted.unknown_fields.get("weird_flag"), Some(&json!(true)));
    }

    #[test]
    fn stop_reason_vocabulary() {
        assert_eq!(map_stop_reason("end_turn"), "stop");
        assert_eq!(map_stop_reason("stop_sequence"), "stop");
        assert_eq!(map_stop_reason("max_tokens"), "length");
        assert_eq!(map_stop_reason("tool_use"), "tool_calls");
        assert_eq!(map_stop_reason("refusal"), "refusal");
    }

    #[test]
    fn transcript_joins_roles_and_content() {
        let messages = vec![
            json!({"role": "user", "content": "one"}),
            json!({"role": "assistant", "content": [{"type": "text", "text": "two"}]}),
        ];

        insta::assert_snapshot!(transcript(&messages), @r"
        [user]: one

        [assistant]: two
        ");
    }
}
