//! Parallel provider fan-out.
//!
//! Activated with params listing `provider/model` targets. Every target gets
//! an isolated clone of the request, answered through the capture invoker
//! concurrently. The merged response is deterministic: the first successful
//! target (in params order) is the base, later successes contribute their
//! choices re-indexed, and usage counters sum.

use async_trait::async_trait;
use axum::response::Response;
use serde_json::Value;

use crate::{
    error::{GatewayError, GatewayResult},
    format::JsonMap,
    pipeline::{HandlerInvoker, PipelineRequest, json_response},
    plugin::{Plugin, RecursiveHandlerPlugin},
    plugins::fallback::parse_targets,
};

#[derive(Default)]
pub struct ParallelPlugin;

impl ParallelPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Plugin for ParallelPlugin {
    fn name(&self) -> &str {
        "virtual:parallel"
    }

    fn as_recursive(&self) -> Option<&dyn RecursiveHandlerPlugin> {
        Some(self)
    }
}

#[async_trait]
impl RecursiveHandlerPlugin for ParallelPlugin {
    async fn handle(
        &self,
        params: &str,
        invoker: &HandlerInvoker<'_>,
        request: &PipelineRequest,
    ) -> GatewayResult<Option<Response>> {
        let targets = parse_targets(params);

        if targets.is_empty() {
            return Ok(None);
        }

        // Each clone is owned by exactly one sub-handler.
        let calls = targets
            .iter()
            .map(|target| invoker.invoke_handler_capture(request.with_model(target)));

        let results = futures::future::join_all(calls).await;

        let mut merged: Option<JsonMap> = None;
        let mut last_error = None;

        for (target, result) in targets.iter().zip(results) {
            match result {
                Ok(response) => match merged.as_mut() {
                    Some(base) => merge_response(base, &response),
                    None => merged = Some(response),
                },
                Err(error) => {
                    log::warn!("Parallel target '{target}' failed: {error}");
                    last_error = Some(error);
                }
            }
        }

        match merged {
            Some(merged) => json_response(200, &merged).map(Some),
            None => Err(last_error.unwrap_or_else(|| GatewayError::Internal("no parallel target succeeded".into()))),
        }
    }
}

/// Folds a later response into the base: choices append re-indexed, usage
/// counters sum.
fn merge_response(base: &mut JsonMap, other: &JsonMap) {
    let base_choices = base
        .entry("choices".to_string())
        .or_insert_with(|| Value::Array(Vec::new()));

    if let (Value::Array(base_choices), Some(Value::Array(other_choices))) = (base_choices, other.get("choices")) {
        for choice in other_choices {
            let mut choice = choice.clone();

            if let Value::Object(choice) = &mut choice {
                choice.insert("index".to_string(), Value::from(base_choices.len() as u64));
            }

            base_choices.push(choice);
        }
    }

    let (Some(Value::Object(base_usage)), Some(Value::Object(other_usage))) =
        (base.get_mut("usage"), other.get("usage"))
    else {
        return;
    };

    for field in ["prompt_tokens", "completion_tokens", "total_tokens"] {
        let sum = base_usage.get(field).and_then(Value::as_u64).unwrap_or(0)
            + other_usage.get(field).and_then(Value::as_u64).unwrap_or(0);

        base_usage.insert(field.to_string(), Value::from(sum));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(content: &str, prompt: u64, completion: u64) -> JsonMap {
        json!({
            "object": "chat.completion",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": prompt, "completion_tokens": completion, "total_tokens": prompt + completion},
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn merge_appends_choices_reindexed_and_sums_usage() {
        let mut base = response("first", 10, 2);
        let other = response("second", 7, 3);

        merge_response(&mut base, &other);

        let choices = base["choices"].as_array().unwrap();
        assert_eq!(choices.len(), 2);
        assert_eq!(choices[0]["index"], json!(0));
        assert_eq!(choices[0]["message"]["content"], json!("first"));
        assert_eq!(choices[1]["index"], json!(1));
        assert_eq!(choices[1]["message"]["content"], json!("second"));

        assert_eq!(base["usage"]["prompt_tokens"], json!(17));
        assert_eq!(base["usage"]["completion_tokens"], json!(5));
        assert_eq!(base["usage"]["total_tokens"], json!(22));
    }

    #[test]
    fn merge_without_usage_only_appends_choices() {
        let mut base = response("first", 1, 1);
        let other = json!({"choices": [{"index": 0, "message": {"role": "assistant", "content": "x"}}]})
            .as_object()
            .unwrap()
            .clone();

        merge_response(&mut base, &other);

        assert_eq!(base["choices"].as_array().unwrap().len(), 2);
        assert_eq!(base["usage"]["prompt_tokens"], json!(1));
    }
}
