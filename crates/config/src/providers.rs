//! Upstream provider configuration.

use secrecy::SecretString;
use serde::Deserialize;

/// Wire style a provider speaks. Decides the completion path and the shape of
/// the auth headers the driver sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStyle {
    /// OpenAI-compatible: `POST {base_url}/chat/completions`, bearer auth.
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic messages: `POST {base_url}/messages`, `x-api-key` auth.
    Anthropic,
}

/// One upstream provider entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Wire style of the provider.
    pub style: ProviderStyle,
    /// Base URL of the provider API, e.g. `https://api.openai.com/v1`.
    pub base_url: Option<String>,
    /// API key. When absent, the auth manager falls back to the
    /// `<PROVIDER>_API_KEY` / `<PROVIDER>_KEY` environment variables.
    pub api_key: Option<SecretString>,
}
