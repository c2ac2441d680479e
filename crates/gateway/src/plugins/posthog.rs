//! Request analytics.
//!
//! Builds one analytics event per request. Non-streaming responses emit on
//! `After`; streams merge every chunk into the context's accumulator and emit
//! on the usage-bearing chunk, falling back to `StreamEnd` when the provider
//! never reports usage. Events go to an [`AnalyticsSink`]; the default sink
//! posts PostHog capture bodies fire-and-forget.

use std::sync::Arc;

use async_trait::async_trait;
use config::PosthogConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{Value, json};

use crate::{
    error::{GatewayError, GatewayResult},
    format::{JsonMap, ManagedResponse},
    http_client::upstream_client,
    pipeline::PipelineRequest,
    plugin::{AfterChunkPlugin, AfterPlugin, BeforePlugin, OnErrorPlugin, Plugin, StreamEndPlugin},
    provider::ProviderHandle,
};

/// One analytics event describing a completed (or failed) gateway request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatAnalyticsEvent {
    pub trace_id: String,
    pub model: String,
    pub provider: String,
    pub base_url: String,
    pub endpoint: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub latency_ms: u64,
    pub status: u16,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Input messages, attached only when content capture is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Value>>,
    /// Final choices, attached only when content capture is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<Value>>,
    /// Tool definitions, attached only when content capture is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
}

/// Destination for analytics events.
pub trait AnalyticsSink: Send + Sync {
    fn capture(&self, event: ChatAnalyticsEvent);
}

/// Sink used when no API key is configured: events only reach the debug log.
pub struct LogSink;

impl AnalyticsSink for LogSink {
    fn capture(&self, event: ChatAnalyticsEvent) {
        log::debug!(
            "Analytics event: trace_id={} model={} provider={} tokens={}/{} latency={}ms status={} error={}",
            event.trace_id,
            event.model,
            event.provider,
            event.prompt_tokens,
            event.completion_tokens,
            event.latency_ms,
            event.status,
            event.is_error,
        );
    }
}

/// Fire-and-forget PostHog capture client.
pub struct PosthogSink {
    client: reqwest::Client,
    api_key: SecretString,
    capture_url: String,
}

impl PosthogSink {
    pub fn new(api_key: SecretString, base_url: &str) -> Self {
        Self {
            client: upstream_client(),
            api_key,
            capture_url: format!("{}/capture/", base_url.trim_end_matches('/')),
        }
    }
}

impl AnalyticsSink for PosthogSink {
    fn capture(&self, event: ChatAnalyticsEvent) {
        let payload = json!({
            "api_key": self.api_key.expose_secret(),
            "event": "llm_gateway_request",
            "distinct_id": event.key_id.clone().unwrap_or_else(|| "anonymous".to_string()),
            "properties": event,
        });

        let client = self.client.clone();
        let url = self.capture_url.clone();

        // The request must never wait on analytics delivery.
        tokio::spawn(async move {
            if let Err(error) = client.post(&url).json(&payload).send().await {
                log::warn!("PostHog capture failed: {error}");
            }
        });
    }
}

/// Builds the sink matching the configuration.
pub fn sink_from_config(config: &PosthogConfig) -> Arc<dyn AnalyticsSink> {
    match &config.api_key {
        Some(api_key) => Arc::new(PosthogSink::new(api_key.clone(), config.base_url_or_default())),
        None => Arc::new(LogSink),
    }
}

/// Streaming-aware analytics plugin.
pub struct PosthogPlugin {
    sink: Arc<dyn AnalyticsSink>,
    include_content: bool,
}

impl PosthogPlugin {
    pub fn new(sink: Arc<dyn AnalyticsSink>, include_content: bool) -> Self {
        Self {
            sink,
            include_content,
        }
    }

    fn base_event(&self, request: &PipelineRequest, provider: &ProviderHandle) -> ChatAnalyticsEvent {
        let body = &request.body;

        let latency_ms = request
            .context
            .telemetry()
            .map(|telemetry| telemetry.started_at.elapsed().as_millis() as u64)
            .unwrap_or(0);

        let identity = request.context.identity();

        ChatAnalyticsEvent {
            trace_id: request.context.trace_id.clone(),
            model: body.get("model").and_then(Value::as_str).unwrap_or("").to_string(),
            provider: provider.name().to_string(),
            base_url: provider.base_url().to_string(),
            endpoint: format!("{:?}", request.endpoint),
            prompt_tokens: 0,
            completion_tokens: 0,
            latency_ms,
            status: 0,
            is_error: false,
            error_message: None,
            temperature: body.get("temperature").and_then(Value::as_f64),
            stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
            max_tokens: body.get("max_tokens").and_then(Value::as_u64),
            key_id: identity.and_then(|identity| identity.key_id.clone()),
            user_id: identity.and_then(|identity| identity.user_id.clone()),
            messages: None,
            choices: None,
            tools: None,
        }
    }

    fn attach_content(&self, event: &mut ChatAnalyticsEvent, request: &PipelineRequest, choices: Vec<Value>) {
        if !self.include_content {
            return;
        }

        event.messages = request
            .body
            .get("messages")
            .and_then(Value::as_array)
            .cloned();
        event.tools = request.body.get("tools").and_then(Value::as_array).cloned();
        event.choices = Some(choices);
    }

    /// Emits the terminal event, exactly once per request.
    fn emit(&self, request: &PipelineRequest, mut event: ChatAnalyticsEvent) {
        let Some(telemetry) = request.context.telemetry() else {
            return;
        };

        if !telemetry.try_mark_emitted() {
            return;
        }

        event.latency_ms = telemetry.started_at.elapsed().as_millis() as u64;

        self.sink.capture(event);
    }
}

impl Plugin for PosthogPlugin {
    fn name(&self) -> &str {
        "posthog"
    }

    fn as_before(&self) -> Option<&dyn BeforePlugin> {
        Some(self)
    }

    fn as_after(&self) -> Option<&dyn AfterPlugin> {
        Some(self)
    }

    fn as_after_chunk(&self) -> Option<&dyn AfterChunkPlugin> {
        Some(self)
    }

    fn as_stream_end(&self) -> Option<&dyn StreamEndPlugin> {
        Some(self)
    }

    fn as_on_error(&self) -> Option<&dyn OnErrorPlugin> {
        Some(self)
    }
}

#[async_trait]
impl BeforePlugin for PosthogPlugin {
    async fn before(
        &self,
        _params: &str,
        _provider: &ProviderHandle,
        request: &PipelineRequest,
        body: JsonMap,
    ) -> GatewayResult<JsonMap> {
        // Start the clock and the accumulator before the upstream call.
        request.context.init_telemetry();

        Ok(body)
    }
}

#[async_trait]
impl AfterPlugin for PosthogPlugin {
    async fn after(
        &self,
        _params: &str,
        provider: &ProviderHandle,
        request: &PipelineRequest,
        _body: &JsonMap,
        status: u16,
        response: JsonMap,
    ) -> GatewayResult<JsonMap> {
        let mut event = self.base_event(request, provider);
        event.status = status;
        event.is_error = status >= 400 || response.contains_key("error");
        event.error_message = extract_error_message(&response);

        if let Ok(parsed) = ManagedResponse::parse(request.format(), &response) {
            let usage = parsed.usage();
            event.prompt_tokens = usage.prompt_tokens;
            event.completion_tokens = usage.completion_tokens;

            let choices = parsed
                .choices()
                .into_iter()
                .map(|choice| {
                    json!({
                        "index": choice.index,
                        "message": {
                            "role": choice.role,
                            "content": choice.content,
                            "tool_calls": if choice.tool_calls.is_empty() { Value::Null } else { Value::Array(choice.tool_calls) },
                        },
                        "finish_reason": choice.finish_reason,
                    })
                })
                .collect();

            self.attach_content(&mut event, request, choices);
        }

        self.emit(request, event);

        Ok(response)
    }
}

#[async_trait]
impl AfterChunkPlugin for PosthogPlugin {
    async fn after_chunk(
        &self,
        _params: &str,
        provider: &ProviderHandle,
        request: &PipelineRequest,
        _body: &JsonMap,
        chunk: JsonMap,
    ) -> GatewayResult<JsonMap> {
        let telemetry = request.context.init_telemetry();

        let chunk_value = Value::Object(chunk.clone());

        {
            let mut accumulator = telemetry
                .accumulator
                .lock()
                .map_err(|_| GatewayError::plugin("posthog", "accumulator poisoned"))?;

            accumulator.observe_chunk(&chunk_value);
        }

        // The usage-bearing chunk is the stream's terminal analytics moment.
        if let Ok(parsed) = ManagedResponse::parse(request.format(), &chunk)
            && parsed.usage() != Default::default()
        {
            let usage = parsed.usage();

            let mut event = self.base_event(request, provider);
            event.status = 200;
            event.prompt_tokens = usage.prompt_tokens;
            event.completion_tokens = usage.completion_tokens;

            let choices = telemetry
                .accumulator
                .lock()
                .map(|accumulator| accumulator.build_choices())
                .unwrap_or_default();

            self.attach_content(&mut event, request, choices);
            self.emit(request, event);
        }

        Ok(chunk)
    }
}

#[async_trait]
impl StreamEndPlugin for PosthogPlugin {
    async fn stream_end(
        &self,
        _params: &str,
        provider: &ProviderHandle,
        request: &PipelineRequest,
        _body: &JsonMap,
        _last_chunk: &JsonMap,
    ) -> GatewayResult<()> {
        let telemetry = request.context.init_telemetry();

        let mut event = self.base_event(request, provider);
        event.status = 200;

        let choices = telemetry
            .accumulator
            .lock()
            .map(|accumulator| accumulator.build_choices())
            .unwrap_or_default();

        self.attach_content(&mut event, request, choices);

        // No-op when a usage-bearing chunk already emitted.
        self.emit(request, event);

        Ok(())
    }
}

#[async_trait]
impl OnErrorPlugin for PosthogPlugin {
    async fn on_error(
        &self,
        _params: &str,
        provider: &ProviderHandle,
        request: &PipelineRequest,
        _body: Option<&JsonMap>,
        error: &GatewayError,
    ) -> GatewayResult<()> {
        request.context.init_telemetry();

        let mut event = self.base_event(request, provider);
        event.status = error.status_code().as_u16();
        event.is_error = true;
        event.error_message = Some(error.to_string());

        self.emit(request, event);

        Ok(())
    }
}

/// Pulls a human-readable message out of an upstream error body.
fn extract_error_message(response: &JsonMap) -> Option<String> {
    let error = response.get("error")?;

    error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| Some(error.to_string()))
}
