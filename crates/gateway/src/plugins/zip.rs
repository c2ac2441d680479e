//! Auto-compaction of long conversations.
//!
//! When the estimated token count of a request's messages exceeds the budget,
//! the middle of the conversation is replaced by a summary produced by the
//! same provider and model. Summaries are cached process-wide, addressed by a
//! content hash of the compacted slice, so identical conversations summarize
//! once.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::{
    error::{GatewayError, GatewayResult},
    format::{JsonMap, ManagedRequest, RequestFormat, convert},
    pipeline::PipelineRequest,
    plugin::{BeforePlugin, Plugin},
    provider::{ChatDriver, ProviderHandle},
};

const DEFAULT_MAX_TOKENS: u64 = 65535;
const SUMMARY_MAX_TOKENS: u64 = 2048;

const SUMMARY_SYSTEM_PROMPT: &str = "You are a conversation compactor. Produce a summary of the \
conversation below that preserves every fact, decision, constraint, name, number and open question \
verbatim enough that the conversation can continue without the original text. Output only the summary.";

/// Process-wide summary cache: content hash of the compactable slice to its
/// replacement messages. Entries never expire within a process lifetime.
static SUMMARY_CACHE: LazyLock<DashMap<[u8; 16], Vec<Value>>> = LazyLock::new(DashMap::new);

/// The four registered compactor variants. The `s` suffix preserves the first
/// user message, the `c` suffix disables the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZipVariant {
    pub name: &'static str,
    pub preserve_first: bool,
    pub disable_cache: bool,
}

impl ZipVariant {
    pub const ALL: [ZipVariant; 4] = [
        ZipVariant {
            name: "zip",
            preserve_first: false,
            disable_cache: false,
        },
        ZipVariant {
            name: "zips",
            preserve_first: true,
            disable_cache: false,
        },
        ZipVariant {
            name: "zipc",
            preserve_first: false,
            disable_cache: true,
        },
        ZipVariant {
            name: "zipsc",
            preserve_first: true,
            disable_cache: true,
        },
    ];
}

/// Token-budgeted conversation compactor.
pub struct ZipPlugin {
    variant: ZipVariant,
    driver: Arc<dyn ChatDriver>,
}

impl ZipPlugin {
    pub fn new(variant: ZipVariant, driver: Arc<dyn ChatDriver>) -> Self {
        Self { variant, driver }
    }

    /// Issues the summarization call to the same provider and model.
    async fn summarize(
        &self,
        provider: &ProviderHandle,
        request: &PipelineRequest,
        model: &str,
        compactable: &[Value],
    ) -> GatewayResult<String> {
        let body = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": SUMMARY_SYSTEM_PROMPT},
                {"role": "user", "content": convert::transcript(compactable)},
            ],
            "max_tokens": SUMMARY_MAX_TOKENS,
        });

        let Value::Object(body) = body else {
            return Err(GatewayError::Internal("summary request is not an object".into()));
        };

        let response = self
            .driver
            .chat_completions(provider, RequestFormat::OpenAiChat, &body, &request.context)
            .await?;

        if !response.is_success() {
            return Err(GatewayError::Upstream {
                status: response.status,
                body: response.body,
            });
        }

        response
            .body
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GatewayError::UpstreamParse("summary response carried no content".into()))
    }
}

impl Plugin for ZipPlugin {
    fn name(&self) -> &str {
        self.variant.name
    }

    fn as_before(&self) -> Option<&dyn BeforePlugin> {
        Some(self)
    }
}

#[async_trait]
impl BeforePlugin for ZipPlugin {
    async fn before(
        &self,
        params: &str,
        provider: &ProviderHandle,
        request: &PipelineRequest,
        body: JsonMap,
    ) -> GatewayResult<JsonMap> {
        let max_tokens = parse_budget(params);

        let mut managed = match ManagedRequest::parse(request.format(), &body) {
            Ok(managed) => managed,
            Err(error) => {
                log::debug!("Compactor could not parse the body, passing through: {error}");
                return Ok(body);
            }
        };

        let messages = match managed.messages() {
            Ok(messages) => messages,
            Err(_) => return Ok(body),
        };

        let estimate = estimate_tokens(&messages);

        if estimate <= max_tokens {
            return Ok(body);
        }

        log::debug!(
            "Conversation estimated at {estimate} tokens exceeds budget {max_tokens}, compacting"
        );

        let split = split_messages(&messages, self.variant.preserve_first);

        if split.compactable.is_empty() {
            return Ok(body);
        }

        let use_cache = !self.variant.disable_cache;
        let hash = content_hash(split.compactable);

        let replacement = if use_cache
            && let Some(cached) = SUMMARY_CACHE.get(&hash)
        {
            cached.value().clone()
        } else {
            let summary = match self
                .summarize(provider, request, managed.model(), split.compactable)
                .await
            {
                Ok(summary) => summary,
                Err(error) => {
                    // Compaction must never break the request.
                    log::warn!("Summarization failed, passing the original body through: {error}");
                    return Ok(body);
                }
            };

            let replacement = convert::summary_messages(&summary);

            if use_cache {
                SUMMARY_CACHE.insert(hash, replacement.clone());
            }

            replacement
        };

        let mut compacted = Vec::with_capacity(split.system.len() + split.first_user.len() + replacement.len() + split.last_input.len());
        compacted.extend_from_slice(split.system);
        compacted.extend_from_slice(split.first_user);
        compacted.extend(replacement);
        compacted.extend_from_slice(split.last_input);

        managed.set_messages(compacted)?;

        managed.to_map()
    }
}

fn parse_budget(params: &str) -> u64 {
    params.parse().ok().filter(|&n| n > 0).unwrap_or(DEFAULT_MAX_TOKENS)
}

/// Rough token estimate: one token per four characters of content, plus a
/// per-message overhead of four.
pub(crate) fn estimate_tokens(messages: &[Value]) -> u64 {
    messages
        .iter()
        .map(|message| {
            let content = convert::message_text(message);
            content.len().div_ceil(4) as u64 + 4
        })
        .sum()
}

struct SplitMessages<'a> {
    system: &'a [Value],
    first_user: &'a [Value],
    compactable: &'a [Value],
    last_input: &'a [Value],
}

fn role(message: &Value) -> &str {
    message.get("role").and_then(Value::as_str).unwrap_or("")
}

/// Splits the conversation into four ordered slices: the leading system
/// prefix, optionally the first user message, the compactable middle, and the
/// trailing input the model is answering.
fn split_messages(messages: &[Value], preserve_first: bool) -> SplitMessages<'_> {
    let len = messages.len();

    let system_end = messages
        .iter()
        .position(|message| role(message) != "system")
        .unwrap_or(len);

    let first_user_end = if preserve_first && system_end < len && role(&messages[system_end]) == "user" {
        system_end + 1
    } else {
        system_end
    };

    let last_start = if len == 0 {
        len
    } else if role(&messages[len - 1]) == "user" {
        len - 1
    } else if role(&messages[len - 1]) == "assistant" && len >= 2 && role(&messages[len - 2]) == "user" {
        len - 2
    } else {
        len - 1
    };

    let last_start = last_start.max(first_user_end);

    SplitMessages {
        system: &messages[..system_end],
        first_user: &messages[system_end..first_user_end],
        compactable: &messages[first_user_end..last_start],
        last_input: &messages[last_start..],
    }
}

/// First 128 bits of SHA-256 over the canonical JSON of the slice.
fn content_hash(compactable: &[Value]) -> [u8; 16] {
    let canonical = serde_json::to_vec(compactable).unwrap_or_default();
    let digest = Sha256::digest(&canonical);

    let mut hash = [0u8; 16];
    hash.copy_from_slice(&digest[..16]);
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use config::ProviderStyle;
    use context::RequestContext;

    use crate::{
        pipeline::Endpoint,
        provider::{ChunkStream, DriverResponse},
    };

    fn message(role: &str, content: &str) -> Value {
        json!({"role": role, "content": content})
    }

    #[test]
    fn token_estimate_counts_content_and_overhead() {
        let messages = vec![message("user", "12345678")];

        // ceil(8 / 4) + 4
        assert_eq!(estimate_tokens(&messages), 6);
    }

    #[test]
    fn split_keeps_system_prefix_and_last_user() {
        let messages = vec![
            message("system", "sys"),
            message("user", "a"),
            message("assistant", "b"),
            message("user", "c"),
        ];

        let split = split_messages(&messages, false);

        assert_eq!(split.system.len(), 1);
        assert!(split.first_user.is_empty());
        assert_eq!(split.compactable.len(), 2);
        assert_eq!(split.last_input, &[message("user", "c")]);
    }

    #[test]
    fn split_preserves_first_user_when_requested() {
        let messages = vec![
            message("system", "sys"),
            message("user", "first"),
            message("assistant", "b"),
            message("user", "c"),
            message("assistant", "d"),
            message("user", "e"),
        ];

        let split = split_messages(&messages, true);

        assert_eq!(split.system, &[message("system", "sys")]);
        assert_eq!(split.first_user, &[message("user", "first")]);
        assert_eq!(split.compactable, &[message("assistant", "b"), message("user", "c"), message("assistant", "d")]);
        assert_eq!(split.last_input, &[message("user", "e")]);
    }

    #[test]
    fn split_takes_trailing_user_assistant_pair() {
        let messages = vec![
            message("user", "a"),
            message("assistant", "b"),
            message("user", "c"),
            message("assistant", "d"),
        ];

        let split = split_messages(&messages, false);

        assert_eq!(split.compactable, &[message("user", "a"), message("assistant", "b")]);
        assert_eq!(split.last_input, &[message("user", "c"), message("assistant", "d")]);
    }

    #[test]
    fn content_hash_is_deterministic() {
        let a = vec![message("user", "same")];
        let b = vec![message("user", "same")];
        let c = vec![message("user", "different")];

        assert_eq!(content_hash(&a), content_hash(&b));
        assert_ne!(content_hash(&a), content_hash(&c));
    }

    struct CountingDriver {
        calls: AtomicUsize,
        summary: &'static str,
    }

    #[async_trait]
    impl ChatDriver for CountingDriver {
        async fn chat_completions(
            &self,
            _provider: &ProviderHandle,
            _format: RequestFormat,
            body: &JsonMap,
            _context: &RequestContext,
        ) -> GatewayResult<DriverResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            assert_eq!(body.get("max_tokens"), Some(&json!(SUMMARY_MAX_TOKENS)));

            let body = json!({
                "choices": [{"index": 0, "message": {"role": "assistant", "content": self.summary}}],
            });

            Ok(DriverResponse {
                status: 200,
                body: body.as_object().unwrap().clone(),
            })
        }

        async fn chat_completions_stream(
            &self,
            _provider: &ProviderHandle,
            _format: RequestFormat,
            _body: &JsonMap,
            _context: &RequestContext,
        ) -> GatewayResult<ChunkStream> {
            unreachable!("compaction never streams")
        }
    }

    fn pipeline_request(body: &JsonMap) -> PipelineRequest {
        PipelineRequest::new(
            Endpoint::ChatCompletions,
            Vec::new(),
            None,
            body.clone(),
            Arc::new(RequestContext::new()),
        )
    }

    fn long_body(tag: &str) -> JsonMap {
        let filler = "x".repeat(400);
        let mut messages = vec![message("user", &format!("start {tag}"))];

        for index in 0..20 {
            messages.push(message("assistant", &format!("{filler} {index}")));
            messages.push(message("user", &format!("{filler} {index}")));
        }

        messages.push(message("user", "final question"));

        json!({"model": "gpt-4", "messages": messages})
            .as_object()
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn compacts_and_caches_by_content() {
        let driver = Arc::new(CountingDriver {
            calls: AtomicUsize::new(0),
            summary: "it was a long chat",
        });

        let plugin = ZipPlugin::new(ZipVariant::ALL[0], driver.clone());
        let provider = ProviderHandle::for_tests("openai", ProviderStyle::OpenAi, HashMap::new());

        let body = long_body("cache-test");
        let request = pipeline_request(&body);

        let compacted = plugin.before("1000", &provider, &request, body.clone()).await.unwrap();

        let output_messages = compacted["messages"].as_array().unwrap();
        let input_messages = body["messages"].as_array().unwrap();

        assert!(output_messages.len() < input_messages.len());
        assert_eq!(driver.calls.load(Ordering::SeqCst), 1);

        let summary_text = output_messages
            .iter()
            .map(convert::message_text)
            .find(|text| text.contains("[Previous conversation summary]"))
            .unwrap();
        assert!(summary_text.contains("it was a long chat"));

        // Byte-identical compactable slice: the cache answers, no second call.
        let request = pipeline_request(&body);
        plugin.before("1000", &provider, &request, body.clone()).await.unwrap();

        assert_eq!(driver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn under_budget_passes_through() {
        let driver = Arc::new(CountingDriver {
            calls: AtomicUsize::new(0),
            summary: "unused",
        });

        let plugin = ZipPlugin::new(ZipVariant::ALL[0], driver.clone());
        let provider = ProviderHandle::for_tests("openai", ProviderStyle::OpenAi, HashMap::new());

        let body = json!({"model": "gpt-4", "messages": [message("user", "short")]})
            .as_object()
            .unwrap()
            .clone();
        let request = pipeline_request(&body);

        let output = plugin.before("", &provider, &request, body.clone()).await.unwrap();

        assert_eq!(output, body);
        assert_eq!(driver.calls.load(Ordering::SeqCst), 0);
    }

    struct FailingDriver;

    #[async_trait]
    impl ChatDriver for FailingDriver {
        async fn chat_completions(
            &self,
            _provider: &ProviderHandle,
            _format: RequestFormat,
            _body: &JsonMap,
            _context: &RequestContext,
        ) -> GatewayResult<DriverResponse> {
            Err(GatewayError::Connection("summary upstream down".into()))
        }

        async fn chat_completions_stream(
            &self,
            _provider: &ProviderHandle,
            _format: RequestFormat,
            _body: &JsonMap,
            _context: &RequestContext,
        ) -> GatewayResult<ChunkStream> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn summarization_failure_passes_original_body_through() {
        let plugin = ZipPlugin::new(ZipVariant::ALL[2], Arc::new(FailingDriver));
        let provider = ProviderHandle::for_tests("openai", ProviderStyle::OpenAi, HashMap::new());

        let body = long_body("failure-test");
        let request = pipeline_request(&body);

        let output = plugin.before("1000", &provider, &request, body.clone()).await.unwrap();

        assert_eq!(output, body);
    }

    #[test]
    fn budget_parsing() {
        assert_eq!(parse_budget("65535"), 65535);
        assert_eq!(parse_budget("1024"), 1024);
        assert_eq!(parse_budget(""), DEFAULT_MAX_TOKENS);
        assert_eq!(parse_budget("junk"), DEFAULT_MAX_TOKENS);
        assert_eq!(parse_budget("0"), DEFAULT_MAX_TOKENS);
    }
}
