//! Streaming-aware accumulator that merges chat-completion chunks into a
//! synthetic final response for analytics.
//!
//! Deltas arrive per SSE event; the accumulator grows sparse per-choice and
//! per-tool-call slots as indexes appear and concatenates string fragments in
//! arrival order.

use serde_json::{Value, json};

/// Accumulated tool call, built from `tool_calls` deltas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallAccumulator {
    pub id: Option<String>,
    pub kind: Option<String>,
    pub name: Option<String>,
    /// Concatenation of every `function.arguments` fragment received for
    /// this index, in arrival order.
    pub arguments: String,
}

/// Accumulated state for one choice index.
#[derive(Debug, Clone, Default)]
pub struct ChoiceAccumulator {
    pub role: Option<String>,
    pub content: String,
    pub tool_calls: Vec<ToolCallAccumulator>,
    pub finish_reason: Option<String>,
}

/// Per-request accumulator, indexed by choice index.
#[derive(Debug, Clone, Default)]
pub struct StreamAccumulator {
    choices: Vec<ChoiceAccumulator>,
}

impl StreamAccumulator {
    /// Merges one chat-completion chunk. Non-chunk shapes are ignored.
    pub fn observe_chunk(&mut self, chunk: &Value) {
        let Some(choices) = chunk.get("choices").and_then(Value::as_array) else {
            return;
        };

        for choice in choices {
            let index = choice.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;

            if self.choices.len() <= index {
                self.choices.resize_with(index + 1, ChoiceAccumulator::default);
            }

            let accumulator = &mut self.choices[index];

            if let Some(delta) = choice.get("delta") {
                if let Some(role) = delta.get("role").and_then(Value::as_str)
                    && accumulator.role.is_none()
                {
                    accumulator.role = Some(role.to_string());
                }

                if let Some(content) = delta.get("content").and_then(Value::as_str) {
                    accumulator.content.push_str(content);
                }

                if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
                    for call in tool_calls {
                        Self::observe_tool_call(accumulator, call);
                    }
                }
            }

            if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                accumulator.finish_reason = Some(reason.to_string());
            }
        }
    }

    fn observe_tool_call(accumulator: &mut ChoiceAccumulator, call: &Value) {
        let index = call.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;

        if accumulator.tool_calls.len() <= index {
            accumulator
                .tool_calls
                .resize_with(index + 1, ToolCallAccumulator::default);
        }

        let slot = &mut accumulator.tool_calls[index];

        if let Some(id) = call.get("id").and_then(Value::as_str)
            && slot.id.is_none()
        {
            slot.id = Some(id.to_string());
        }

        if let Some(kind) = call.get("type").and_then(Value::as_str)
            && slot.kind.is_none()
        {
            slot.kind = Some(kind.to_string());
        }

        if let Some(function) = call.get("function") {
            if let Some(name) = function.get("name").and_then(Value::as_str)
                && slot.name.is_none()
            {
                slot.name = Some(name.to_string());
            }

            if let Some(arguments) = function.get("arguments").and_then(Value::as_str) {
                slot.arguments.push_str(arguments);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    pub fn choices(&self) -> &[ChoiceAccumulator] {
        &self.choices
    }

    /// Builds final choices in the shape of a non-streaming response.
    pub fn build_choices(&self) -> Vec<Value> {
        self.choices
            .iter()
            .enumerate()
            .map(|(index, choice)| {
                let mut message = json!({
                    "role": choice.role.as_deref().unwrap_or("assistant"),
                    "content": choice.content,
                });

                if !choice.tool_calls.is_empty() {
                    let tool_calls: Vec<Value> = choice
                        .tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id.as_deref().unwrap_or_default(),
                                "type": call.kind.as_deref().unwrap_or("function"),
                                "function": {
                                    "name": call.name.as_deref().unwrap_or_default(),
                                    "arguments": call.arguments,
                                },
                            })
                        })
                        .collect();

                    message["tool_calls"] = Value::Array(tool_calls);
                }

                json!({
                    "index": index,
                    "message": message,
                    "finish_reason": choice.finish_reason,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content_chunk(index: u64, content: &str) -> Value {
        json!({
            "object": "chat.completion.chunk",
            "choices": [{"index": index, "delta": {"content": content}}],
        })
    }

    #[test]
    fn concatenates_content_fragments_in_arrival_order() {
        let mut accumulator = StreamAccumulator::default();

        accumulator.observe_chunk(&json!({
            "choices": [{"index": 0, "delta": {"role": "assistant", "content": "He"}}],
        }));
        accumulator.observe_chunk(&content_chunk(0, "llo"));
        accumulator.observe_chunk(&content_chunk(0, " world"));

        assert_eq!(accumulator.choices()[0].content, "Hello world");
        assert_eq!(accumulator.choices()[0].role.as_deref(), Some("assistant"));
    }

    #[test]
    fn reassembles_tool_call_arguments() {
        let mut accumulator = StreamAccumulator::default();

        accumulator.observe_chunk(&json!({
            "choices": [{"index": 0, "delta": {"tool_calls": [{
                "index": 0,
                "id": "call_1",
                "type": "function",
                "function": {"name": "get_weather", "arguments": "{\"city\":"},
            }]}}],
        }));
        accumulator.observe_chunk(&json!({
            "choices": [{"index": 0, "delta": {"tool_calls": [{
                "index": 0,
                "function": {"arguments": "\"Paris\"}"},
            }]}}],
        }));

        let call = &accumulator.choices()[0].tool_calls[0];
        assert_eq!(call.id.as_deref(), Some("call_1"));
        assert_eq!(call.name.as_deref(), Some("get_weather"));
        assert_eq!(call.arguments, "{\"city\":\"Paris\"}");
    }

    #[test]
    fn grows_sparse_slots_for_out_of_order_indexes() {
        let mut accumulator = StreamAccumulator::default();

        accumulator.observe_chunk(&content_chunk(2, "third"));
        accumulator.observe_chunk(&content_chunk(0, "first"));

        assert_eq!(accumulator.choices().len(), 3);
        assert_eq!(accumulator.choices()[0].content, "first");
        assert_eq!(accumulator.choices()[1].content, "");
        assert_eq!(accumulator.choices()[2].content, "third");
    }

    #[test]
    fn records_finish_reason_from_final_chunk() {
        let mut accumulator = StreamAccumulator::default();

        accumulator.observe_chunk(&content_chunk(0, "done"));
        accumulator.observe_chunk(&json!({
            "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}],
        }));

        assert_eq!(accumulator.choices()[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn builds_choices_with_tool_calls() {
        let mut accumulator = StreamAccumulator::default();

        accumulator.observe_chunk(&json!({
            "choices": [{"index": 0, "delta": {
                "role": "assistant",
                "tool_calls": [{"index": 0, "id": "call_9", "type": "function",
                    "function": {"name": "add", "arguments": "{\"a\":1}"}}],
            }, "finish_reason": "tool_calls"}],
        }));

        let choices = accumulator.build_choices();
        assert_eq!(choices.len(), 1);
        assert_eq!(choices[0]["message"]["tool_calls"][0]["function"]["arguments"], "{\"a\":1}");
        assert_eq!(choices[0]["finish_reason"], "tool_calls");
    }
}
