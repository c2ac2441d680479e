//! Provider handles and the upstream driver contract.

pub(crate) mod http;

use std::{collections::HashMap, pin::Pin, sync::Arc};

use async_trait::async_trait;
use config::{ProviderConfig, ProviderStyle};
use context::RequestContext;
use futures::Stream;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

use crate::{
    auth::AuthManager,
    error::{GatewayError, GatewayResult},
    format::{JsonMap, RequestFormat},
};

/// Scope name of the model-listing capability.
pub const LIST_MODELS_SCOPE: &str = "list_models";

/// Opaque descriptor of one upstream provider, immutable after registration.
pub struct ProviderHandle {
    name: String,
    base_url: Url,
    style: ProviderStyle,
    commands: HashMap<String, Command>,
    auth: Arc<AuthManager>,
    api_key: Option<SecretString>,
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("name", &self.name)
            .field("base_url", &self.base_url.as_str())
            .field("style", &self.style)
            .finish_non_exhaustive()
    }
}

impl ProviderHandle {
    /// Builds a handle from its configuration entry. The default command
    /// table exposes HTTP-backed model listing.
    pub fn from_config(name: &str, config: &ProviderConfig, auth: Arc<AuthManager>) -> GatewayResult<Self> {
        let base_url = config.base_url.as_deref().unwrap_or_else(|| match config.style {
            ProviderStyle::OpenAi => "https://api.openai.com/v1",
            ProviderStyle::Anthropic => "https://api.anthropic.com/v1",
        });

        let base_url = Url::parse(base_url)
            .map_err(|e| GatewayError::Internal(format!("Provider '{name}' base_url invalid: {e}")))?;

        let mut commands = HashMap::new();
        commands.insert(
            LIST_MODELS_SCOPE.to_string(),
            Command::ListModels(Arc::new(http::HttpListModels::new())),
        );

        Ok(Self {
            name: name.to_ascii_lowercase(),
            base_url,
            style: config.style,
            commands,
            auth,
            api_key: config.api_key.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn style(&self) -> ProviderStyle {
        self.style
    }

    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    pub(crate) fn configured_api_key(&self) -> Option<&SecretString> {
        self.api_key.as_ref()
    }

    /// Looks up a capability by scope name, e.g. [`LIST_MODELS_SCOPE`].
    pub fn command(&self, scope: &str) -> Option<&Command> {
        self.commands.get(scope)
    }

    /// Joins a path onto the provider base URL, keeping any base path prefix.
    pub fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/{}", path.trim_start_matches('/'))
    }

    #[cfg(test)]
    pub(crate) fn for_tests(name: &str, style: ProviderStyle, commands: HashMap<String, Command>) -> Self {
        Self {
            name: name.to_string(),
            base_url: Url::parse("https://upstream.test/v1").unwrap(),
            style,
            commands,
            auth: Arc::new(AuthManager::new()),
            api_key: Some(SecretString::from("test-key".to_string())),
        }
    }
}

/// A provider capability, keyed by scope name in the handle's command table.
#[derive(Clone)]
pub enum Command {
    ListModels(Arc<dyn ListModels>),
}

/// One model entry returned by the listing capability.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelEntry {
    pub id: String,

    #[serde(default)]
    pub owned_by: Option<String>,

    #[serde(default)]
    pub created: Option<u64>,
}

/// Model-listing capability.
#[async_trait]
pub trait ListModels: Send + Sync {
    async fn list_models(&self, provider: &ProviderHandle, context: &RequestContext) -> GatewayResult<Vec<ModelEntry>>;
}

/// Non-streaming upstream result: status and parsed JSON body. Non-2xx
/// statuses flow back to the client verbatim.
#[derive(Debug, Clone)]
pub struct DriverResponse {
    pub status: u16,
    pub body: JsonMap,
}

impl DriverResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Stream of parsed SSE chunk payloads. The `[DONE]` terminator is consumed
/// by the driver; in-stream failures surface as `Err` items.
pub type ChunkStream = Pin<Box<dyn Stream<Item = GatewayResult<JsonMap>> + Send>>;

/// Wire driver for chat completions against one provider.
#[async_trait]
pub trait ChatDriver: Send + Sync {
    /// Issues a non-streaming completion call.
    async fn chat_completions(
        &self,
        provider: &ProviderHandle,
        format: RequestFormat,
        body: &JsonMap,
        context: &RequestContext,
    ) -> GatewayResult<DriverResponse>;

    /// Issues a streaming completion call, returning the chunk stream.
    async fn chat_completions_stream(
        &self,
        provider: &ProviderHandle,
        format: RequestFormat,
        body: &JsonMap,
        context: &RequestContext,
    ) -> GatewayResult<ChunkStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_base_path() {
        let provider = ProviderHandle::for_tests("openai", ProviderStyle::OpenAi, HashMap::new());

        assert_eq!(provider.endpoint("/chat/completions"), "https://upstream.test/v1/chat/completions");
        assert_eq!(provider.endpoint("models"), "https://upstream.test/v1/models");
    }
}
