//! Default HTTP wire driver for OpenAI-compatible and Anthropic providers.

use async_trait::async_trait;
use config::ProviderStyle;
use context::RequestContext;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, header::AUTHORIZATION};
use secrecy::ExposeSecret;
use serde_json::{Value, json};

use super::{ChatDriver, ChunkStream, DriverResponse, ListModels, ModelEntry, ProviderHandle};
use crate::{
    error::{GatewayError, GatewayResult},
    format::{JsonMap, RequestFormat, convert, managed, openai_chat},
    http_client::upstream_client,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Driver issuing real HTTP calls with the shared connection pool.
pub struct HttpChatDriver {
    client: Client,
}

impl HttpChatDriver {
    pub fn new() -> Self {
        Self {
            client: upstream_client(),
        }
    }

    fn authorized_post(
        &self,
        provider: &ProviderHandle,
        url: &str,
        context: &RequestContext,
    ) -> GatewayResult<RequestBuilder> {
        let key = provider.auth().collect_target_auth("chat", provider, context)?;

        let builder = self.client.post(url).header("Content-Type", "application/json");

        let builder = match provider.style() {
            ProviderStyle::OpenAi => builder.header(AUTHORIZATION, format!("Bearer {}", key.expose_secret())),
            ProviderStyle::Anthropic => builder
                .header("x-api-key", key.expose_secret())
                .header("anthropic-version", ANTHROPIC_VERSION),
        };

        Ok(builder)
    }
}

impl Default for HttpChatDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// The upstream URL and body for a request, converting the body when the
/// provider speaks a different style than the client.
fn prepare_outgoing(
    provider: &ProviderHandle,
    format: RequestFormat,
    body: &JsonMap,
) -> GatewayResult<(String, JsonMap, bool)> {
    match (provider.style(), format) {
        (ProviderStyle::OpenAi, RequestFormat::OpenAiChat) => {
            Ok((provider.endpoint("chat/completions"), body.clone(), false))
        }
        (ProviderStyle::OpenAi, RequestFormat::OpenAiResponses) => {
            Ok((provider.endpoint("responses"), body.clone(), false))
        }
        (ProviderStyle::Anthropic, RequestFormat::Anthropic) => {
            Ok((provider.endpoint("messages"), body.clone(), false))
        }
        (ProviderStyle::Anthropic, RequestFormat::OpenAiChat) => {
            let request: openai_chat::ChatCompletionRequest = serde_json::from_value(Value::Object(body.clone()))
                .map_err(|e| GatewayError::InvalidRequest(format!("Failed to parse request body: {e}")))?;

            let converted = convert::chat_request_to_anthropic(&request);
            let converted = serde_json::to_value(&converted)
                .ok()
                .and_then(|value| match value {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .ok_or_else(|| GatewayError::Internal("converted request serialized to a non-object".into()))?;

            Ok((provider.endpoint("messages"), converted, true))
        }
        (ProviderStyle::OpenAi, RequestFormat::Anthropic) | (ProviderStyle::Anthropic, RequestFormat::OpenAiResponses) => {
            Err(GatewayError::InvalidRequest(format!(
                "Provider '{}' does not accept this request format",
                provider.name()
            )))
        }
    }
}

/// Parses an upstream body, wrapping non-JSON error payloads in the standard
/// envelope so they still reach the client.
fn parse_upstream_body(status: u16, text: &str) -> JsonMap {
    match sonic_rs::from_str::<Value>(text) {
        Ok(Value::Object(map)) => map,
        _ => json!({"error": {"code": status, "message": text}})
            .as_object()
            .cloned()
            .unwrap_or_default(),
    }
}

#[async_trait]
impl ChatDriver for HttpChatDriver {
    async fn chat_completions(
        &self,
        provider: &ProviderHandle,
        format: RequestFormat,
        body: &JsonMap,
        context: &RequestContext,
    ) -> GatewayResult<DriverResponse> {
        let (url, outgoing, convert_back) = prepare_outgoing(provider, format, body)?;

        let payload = managed::serialize_body(&outgoing)?;

        let response = self
            .authorized_post(provider, &url, context)?
            .body(payload)
            .send()
            .await
            .map_err(|e| GatewayError::Connection(format!("Failed to send request to '{}': {e}", provider.name())))?;

        let status = response.status().as_u16();

        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Connection(format!("Failed to read response from '{}': {e}", provider.name())))?;

        let mut body = parse_upstream_body(status, &text);

        if (200..300).contains(&status) && convert_back {
            let anthropic_response = serde_json::from_value(Value::Object(body))
                .map_err(|e| GatewayError::UpstreamParse(format!("Failed to parse response body: {e}")))?;

            let converted = convert::anthropic_response_to_chat(&anthropic_response);
            body = match serde_json::to_value(&converted) {
                Ok(Value::Object(map)) => map,
                _ => return Err(GatewayError::Internal("converted response serialized to a non-object".into())),
            };
        }

        Ok(DriverResponse { status, body })
    }

    async fn chat_completions_stream(
        &self,
        provider: &ProviderHandle,
        format: RequestFormat,
        body: &JsonMap,
        context: &RequestContext,
    ) -> GatewayResult<ChunkStream> {
        let (url, outgoing, convert_back) = prepare_outgoing(provider, format, body)?;

        // Chunk-level translation between styles is not supported; the client
        // must stream in the provider's native format.
        if convert_back {
            return Err(GatewayError::InvalidRequest(format!(
                "Streaming through provider '{}' requires the provider's native request format",
                provider.name()
            )));
        }

        let payload = managed::serialize_body(&outgoing)?;

        let response = self
            .authorized_post(provider, &url, context)?
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                GatewayError::Connection(format!(
                    "Failed to send streaming request to '{}': {e}",
                    provider.name()
                ))
            })?;

        let status = response.status().as_u16();

        if !(200..300).contains(&status) {
            let text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("Upstream streaming error from '{}' ({status}): {text}", provider.name());

            return Err(GatewayError::Upstream {
                status,
                body: parse_upstream_body(status, &text),
            });
        }

        let provider_name = provider.name().to_string();
        let event_stream = response.bytes_stream().eventsource();

        let chunk_stream = event_stream.filter_map(move |event| {
            let provider = provider_name.clone();

            async move {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        return Some(Err(GatewayError::Connection(format!(
                            "SSE decode error from '{provider}': {e}"
                        ))));
                    }
                };

                if event.data == "[DONE]" {
                    return None;
                }

                match sonic_rs::from_str::<Value>(&event.data) {
                    Ok(Value::Object(map)) => Some(Ok(map)),
                    _ => {
                        log::warn!("Skipping unparseable chunk from '{provider}'");
                        None
                    }
                }
            }
        });

        Ok(Box::pin(chunk_stream))
    }
}

/// HTTP-backed model listing, `GET {base_url}/models` for both styles.
pub(crate) struct HttpListModels {
    client: Client,
}

impl HttpListModels {
    pub(crate) fn new() -> Self {
        Self {
            client: upstream_client(),
        }
    }
}

#[async_trait]
impl ListModels for HttpListModels {
    async fn list_models(&self, provider: &ProviderHandle, context: &RequestContext) -> GatewayResult<Vec<ModelEntry>> {
        #[derive(serde::Deserialize)]
        struct ModelsResponse {
            #[serde(default)]
            data: Vec<ModelEntry>,
        }

        let key = provider
            .auth()
            .collect_target_auth(super::LIST_MODELS_SCOPE, provider, context)?;

        let builder = self.client.get(provider.endpoint("models"));

        let builder = match provider.style() {
            ProviderStyle::OpenAi => builder.bearer_auth(key.expose_secret()),
            ProviderStyle::Anthropic => builder
                .header("x-api-key", key.expose_secret())
                .header("anthropic-version", ANTHROPIC_VERSION),
        };

        let response = builder.send().await.map_err(|e| {
            GatewayError::Connection(format!("Failed to request models from '{}': {e}", provider.name()))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "<empty response>".to_string());

            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                body: parse_upstream_body(status.as_u16(), &body),
            });
        }

        let models: ModelsResponse = response.json().await.map_err(|e| {
            GatewayError::UpstreamParse(format!("Failed to parse models from '{}': {e}", provider.name()))
        })?;

        Ok(models.data)
    }
}
