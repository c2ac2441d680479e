//! Pipeline executor.
//!
//! Runs a resolved plugin chain against a provider, handling both the
//! non-streaming and the SSE streaming paths. The executor keeps all of its
//! state on the stack so recursive re-entry through [`HandlerInvoker`] is
//! safe.

use std::{collections::VecDeque, sync::Arc};

use axum::{
    body::{Body, Bytes},
    http::{StatusCode, header},
    response::Response,
};
use context::RequestContext;
use futures::StreamExt;
use serde_json::{Value, json};

use crate::{
    error::{GatewayError, GatewayResult},
    format::{JsonMap, RequestFormat, managed},
    plugin::chain::{Chain, strip_model_suffix},
    provider::{ChunkStream, DriverResponse, ProviderHandle},
    server::Gateway,
};

/// Upper bound on virtual-plugin re-entry.
const MAX_RECURSION_DEPTH: u32 = 4;

/// The HTTP endpoints the pipeline serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    ChatCompletions,
    Messages,
    Responses,
    Models,
}

impl Endpoint {
    /// Request format carried by bodies on this endpoint.
    pub fn format(self) -> RequestFormat {
        match self {
            Self::ChatCompletions | Self::Models => RequestFormat::OpenAiChat,
            Self::Messages => RequestFormat::Anthropic,
            Self::Responses => RequestFormat::OpenAiResponses,
        }
    }
}

/// One request moving through the executor.
///
/// Cloned before fan-out; each clone is owned by exactly one sub-handler.
/// `body` is the body as the client sent it; hooks thread the evolving body
/// separately.
#[derive(Clone)]
pub struct PipelineRequest {
    pub endpoint: Endpoint,
    /// URL path segments before the endpoint, minus the provider segment.
    pub plugin_segments: Vec<String>,
    /// Provider selected by a URL path segment, if any.
    pub provider_hint: Option<String>,
    /// Raw request body as received.
    pub body: JsonMap,
    pub context: Arc<RequestContext>,
    pub(crate) depth: u32,
}

impl PipelineRequest {
    pub fn new(
        endpoint: Endpoint,
        plugin_segments: Vec<String>,
        provider_hint: Option<String>,
        body: JsonMap,
        context: Arc<RequestContext>,
    ) -> Self {
        Self {
            endpoint,
            plugin_segments,
            provider_hint,
            body,
            context,
            depth: 0,
        }
    }

    pub fn format(&self) -> RequestFormat {
        self.endpoint.format()
    }

    /// The model string as currently present in the body.
    pub fn model(&self) -> &str {
        self.body.get("model").and_then(Value::as_str).unwrap_or("")
    }

    /// A clone of this request targeting a different model, used by fan-out
    /// and fallback plugins.
    pub fn with_model(&self, model: &str) -> Self {
        let mut cloned = self.clone();
        cloned.provider_hint = None;
        cloned.body.insert("model".to_string(), Value::String(model.to_string()));
        cloned
    }
}

/// Re-enters the executor on behalf of a recursive-handler plugin.
pub struct HandlerInvoker<'a> {
    gateway: &'a Gateway,
    depth: u32,
}

impl<'a> HandlerInvoker<'a> {
    pub(crate) fn new(gateway: &'a Gateway, depth: u32) -> Self {
        Self { gateway, depth }
    }

    /// Re-enters the executor, producing the full HTTP response.
    pub async fn invoke_handler(&self, mut request: PipelineRequest) -> GatewayResult<Response> {
        request.depth = self.depth;

        Box::pin(self.gateway.execute(request)).await
    }

    /// Re-enters the executor with streaming forced off, collecting the final
    /// response JSON instead of writing it out.
    pub async fn invoke_handler_capture(&self, mut request: PipelineRequest) -> GatewayResult<JsonMap> {
        request.depth = self.depth;
        request.body.insert("stream".to_string(), Value::Bool(false));

        Box::pin(self.gateway.execute_capture(request)).await
    }
}

impl Gateway {
    /// Runs one request through its resolved chain and provider, producing
    /// the HTTP response.
    pub async fn execute(&self, request: PipelineRequest) -> GatewayResult<Response> {
        if request.depth > MAX_RECURSION_DEPTH {
            return Err(GatewayError::RecursionLimit);
        }

        let segments: Vec<&str> = request.plugin_segments.iter().map(String::as_str).collect();
        let chain = self.registry().resolve_chain(&segments, request.model());

        // Recursive handlers may short-circuit the pipeline entirely.
        let invoker = HandlerInvoker::new(self, request.depth + 1);

        for instance in chain.recursives() {
            let Some(handler) = instance.plugin.as_recursive() else {
                continue;
            };

            if let Some(response) = handler.handle(&instance.params, &invoker, &request).await? {
                return Ok(response);
            }
        }

        let provider = self.resolve_provider(&request)?;

        let mut request = request;
        normalize_model(&mut request, &provider);

        let streaming = request
            .body
            .get("stream")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if streaming {
            self.execute_stream(request, chain, provider).await
        } else {
            let (status, response_body) = self.run_to_json(&request, &chain, &provider).await?;

            json_response(status, &response_body)
        }
    }

    /// Capture-mode entry: no recursion stage, no streaming, returns the
    /// final response map.
    pub(crate) async fn execute_capture(&self, request: PipelineRequest) -> GatewayResult<JsonMap> {
        if request.depth > MAX_RECURSION_DEPTH {
            return Err(GatewayError::RecursionLimit);
        }

        let segments: Vec<&str> = request.plugin_segments.iter().map(String::as_str).collect();
        let chain = self.registry().resolve_chain(&segments, request.model());

        let provider = self.resolve_provider(&request)?;

        let mut request = request;
        normalize_model(&mut request, &provider);

        let (_, response_body) = self.run_to_json(&request, &chain, &provider).await?;

        Ok(response_body)
    }

    /// Non-streaming core: Before fold, upstream call, After fold. Invokes
    /// `OnError` hooks on every failure path before surfacing the error.
    async fn run_to_json(
        &self,
        request: &PipelineRequest,
        chain: &Chain,
        provider: &Arc<ProviderHandle>,
    ) -> GatewayResult<(u16, JsonMap)> {
        let body = match run_before(chain, provider, request, request.body.clone()).await {
            Ok(body) => body,
            Err(error) => {
                run_on_error(chain, provider, request, None, &error).await;
                return Err(error);
            }
        };

        let upstream = self
            .driver()
            .chat_completions(provider, request.format(), &body, &request.context)
            .await;

        let DriverResponse { status, body: response } = match upstream {
            Ok(response) => response,
            Err(error) => {
                run_on_error(chain, provider, request, Some(&body), &error).await;
                return Err(error);
            }
        };

        if !(200..300).contains(&status) {
            let error = GatewayError::Upstream { status, body: response };
            run_on_error(chain, provider, request, Some(&body), &error).await;
            return Err(error);
        }

        let mut response = response;

        for instance in chain.afters() {
            let Some(hook) = instance.plugin.as_after() else {
                continue;
            };

            response = match hook
                .after(&instance.params, provider, request, &body, status, response)
                .await
            {
                Ok(response) => response,
                Err(error) => {
                    run_on_error(chain, provider, request, Some(&body), &error).await;
                    return Err(error);
                }
            };
        }

        Ok((status, response))
    }

    async fn execute_stream(
        &self,
        request: PipelineRequest,
        chain: Chain,
        provider: Arc<ProviderHandle>,
    ) -> GatewayResult<Response> {
        let body = match run_before(&chain, &provider, &request, request.body.clone()).await {
            Ok(body) => body,
            Err(error) => {
                run_on_error(&chain, &provider, &request, None, &error).await;
                return Err(error);
            }
        };

        let upstream = self
            .driver()
            .chat_completions_stream(&provider, request.format(), &body, &request.context)
            .await;

        let upstream = match upstream {
            Ok(stream) => stream,
            Err(error) => {
                run_on_error(&chain, &provider, &request, Some(&body), &error).await;
                return Err(error);
            }
        };

        Ok(sse_response(StreamState {
            upstream,
            chain: Arc::new(chain),
            provider,
            request: Arc::new(request),
            body: Arc::new(body),
            last_chunk: None,
            pending: VecDeque::new(),
            done: false,
        }))
    }
}

/// Picks the provider for a request: the URL path hint wins, then a
/// `provider/model` prefix on the model string.
impl Gateway {
    fn resolve_provider(&self, request: &PipelineRequest) -> GatewayResult<Arc<ProviderHandle>> {
        if let Some(hint) = &request.provider_hint {
            return self
                .provider(hint)
                .ok_or_else(|| GatewayError::ProviderNotFound(hint.clone()));
        }

        let model = strip_model_suffix(request.model());

        if let Some((name, rest)) = model.split_once('/')
            && !rest.is_empty()
            && !name.is_empty()
        {
            return self
                .provider(name)
                .ok_or_else(|| GatewayError::ProviderNotFound(name.to_string()));
        }

        Err(GatewayError::NoProviderSelected)
    }
}

/// Rewrites the body's model to what the upstream should see: plugin suffix
/// stripped, provider prefix stripped.
fn normalize_model(request: &mut PipelineRequest, provider: &ProviderHandle) {
    let model = request.model().to_string();

    if model.is_empty() {
        return;
    }

    let mut clean = strip_model_suffix(&model).to_string();

    let prefix = format!("{}/", provider.name());
    if let Some(rest) = clean.strip_prefix(&prefix) {
        clean = rest.to_string();
    }

    request.body.insert("model".to_string(), Value::String(clean));
}

async fn run_before(
    chain: &Chain,
    provider: &ProviderHandle,
    request: &PipelineRequest,
    mut body: JsonMap,
) -> GatewayResult<JsonMap> {
    for instance in chain.befores() {
        let Some(hook) = instance.plugin.as_before() else {
            continue;
        };

        body = hook.before(&instance.params, provider, request, body).await?;
    }

    Ok(body)
}

async fn run_on_error(
    chain: &Chain,
    provider: &ProviderHandle,
    request: &PipelineRequest,
    body: Option<&JsonMap>,
    error: &GatewayError,
) {
    for instance in chain.on_errors() {
        let Some(hook) = instance.plugin.as_on_error() else {
            continue;
        };

        if let Err(hook_error) = hook.on_error(&instance.params, provider, request, body, error).await {
            log::warn!("OnError hook '{}' failed: {hook_error}", instance.plugin.name());
        }
    }
}

struct StreamState {
    upstream: ChunkStream,
    chain: Arc<Chain>,
    provider: Arc<ProviderHandle>,
    request: Arc<PipelineRequest>,
    body: Arc<JsonMap>,
    last_chunk: Option<JsonMap>,
    pending: VecDeque<Bytes>,
    done: bool,
}

/// Builds the SSE response: every upstream chunk runs through the
/// `AfterChunk` hooks, `StreamEnd` fires after the upstream finishes, and the
/// terminator is always written. Dropping the response body drops the
/// upstream connection.
fn sse_response(state: StreamState) -> Response {
    let stream = futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                return Some((frame, state));
            }

            if state.done {
                return None;
            }

            match state.upstream.next().await {
                Some(Ok(chunk)) => {
                    let processed = apply_after_chunk(
                        &state.chain,
                        &state.provider,
                        &state.request,
                        &state.body,
                        chunk,
                    )
                    .await;

                    match processed {
                        Ok(chunk) => {
                            let frame = data_frame(&chunk);
                            state.last_chunk = Some(chunk);
                            return Some((frame, state));
                        }
                        Err(error) => {
                            log::error!("Chunk hook failed, dropping chunk: {error}");
                            continue;
                        }
                    }
                }
                Some(Err(error)) => {
                    log::error!("Upstream stream error: {error}");
                    run_on_error(&state.chain, &state.provider, &state.request, Some(state.body.as_ref()), &error).await;

                    state.pending.push_back(data_frame(&error_chunk(&error)));
                    finish_stream(&mut state).await;
                }
                None => {
                    finish_stream(&mut state).await;
                }
            }
        }
    });

    let body = Body::from_stream(stream.map(Ok::<_, std::convert::Infallible>));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, header::HeaderValue::from_static("text/event-stream"));
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-cache"));

    response
}

/// Runs `StreamEnd` hooks with the last chunk and queues the terminator.
async fn finish_stream(state: &mut StreamState) {
    let last = state.last_chunk.clone().unwrap_or_default();

    for instance in state.chain.stream_ends() {
        let Some(hook) = instance.plugin.as_stream_end() else {
            continue;
        };

        let result = hook
            .stream_end(&instance.params, &state.provider, &state.request, &state.body, &last)
            .await;

        if let Err(error) = result {
            log::warn!("StreamEnd hook '{}' failed: {error}", instance.plugin.name());
        }
    }

    state.pending.push_back(Bytes::from_static(b"data: [DONE]\n\n"));
    state.done = true;
}

async fn apply_after_chunk(
    chain: &Chain,
    provider: &ProviderHandle,
    request: &PipelineRequest,
    body: &JsonMap,
    mut chunk: JsonMap,
) -> GatewayResult<JsonMap> {
    for instance in chain.after_chunks() {
        let Some(hook) = instance.plugin.as_after_chunk() else {
            continue;
        };

        chunk = hook
            .after_chunk(&instance.params, provider, request, body, chunk)
            .await?;
    }

    Ok(chunk)
}

fn data_frame(chunk: &JsonMap) -> Bytes {
    let json = sonic_rs::to_string(chunk).unwrap_or_else(|e| {
        log::error!("Failed to serialize chunk: {e}");
        r#"{"error":{"code":500,"message":"serialization failed"}}"#.to_string()
    });

    Bytes::from(format!("data: {json}\n\n"))
}

fn error_chunk(error: &GatewayError) -> JsonMap {
    if let GatewayError::Upstream { body, .. } = error {
        return body.clone();
    }

    json!({
        "error": {
            "code": error.status_code().as_u16(),
            "message": error.to_string(),
        },
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}

pub(crate) fn json_response(status: u16, body: &JsonMap) -> GatewayResult<Response> {
    let bytes = managed::serialize_body(body)?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/json"));

    Ok(response)
}
