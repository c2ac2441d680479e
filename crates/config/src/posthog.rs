//! PostHog analytics configuration.

use secrecy::SecretString;
use serde::Deserialize;

const DEFAULT_BASE_URL: &str = "https://us.i.posthog.com";

/// PostHog capture settings. Environment variables `POSTHOG_API_KEY`,
/// `POSTHOG_BASE_URL` and `POSTHOG_INCLUDE_CONTENT` override the file values
/// at load time.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PosthogConfig {
    /// Project API key. Analytics are disabled when unset.
    pub api_key: Option<SecretString>,
    /// Capture endpoint base URL.
    pub base_url: Option<String>,
    /// Attach input messages, built choices and tools to events.
    pub include_content: bool,
}

impl PosthogConfig {
    /// Capture base URL, the US ingestion endpoint unless overridden.
    pub fn base_url_or_default(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }
}
