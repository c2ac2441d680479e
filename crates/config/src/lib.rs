//! Switchboard configuration structures to map the switchboard.toml configuration.

#![deny(missing_docs)]

mod loader;
mod plugins;
mod posthog;
mod providers;
mod server;

use std::path::Path;

pub use plugins::PluginsConfig;
pub use posthog::PosthogConfig;
pub use providers::{ProviderConfig, ProviderStyle};
pub use server::ServerConfig;

use serde::Deserialize;
use std::collections::BTreeMap;

/// Main configuration structure for the switchboard application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,
    /// Upstream providers keyed by their lowercase name.
    pub providers: BTreeMap<String, ProviderConfig>,
    /// Plugin chain configuration (head and tail plugins).
    pub plugins: PluginsConfig,
    /// PostHog analytics configuration.
    pub posthog: PosthogConfig,
}

impl Config {
    /// Load configuration from a file path, applying environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates that the configuration has at least one provider.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate_has_providers(self)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use crate::{Config, ProviderStyle};

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert!(config.providers.is_empty());
        assert_eq!(config.plugins.head, vec!["models".to_string()]);
        assert_eq!(config.plugins.tail, vec!["posthog".to_string()]);
        assert!(config.posthog.api_key.is_none());
        assert!(!config.posthog.include_content);
        assert!(config.server.listen_address.is_none());
    }

    #[test]
    fn provider_table() {
        let config: Config = toml::from_str(indoc! {r#"
            [providers.openai]
            style = "openai"
            base_url = "https://api.openai.com/v1"

            [providers.anthropic]
            style = "anthropic"
            base_url = "https://api.anthropic.com/v1"
            api_key = "sk-test"
        "#})
        .unwrap();

        let openai = &config.providers["openai"];
        assert_eq!(openai.style, ProviderStyle::OpenAi);
        assert_eq!(openai.base_url.as_deref(), Some("https://api.openai.com/v1"));
        assert!(openai.api_key.is_none());

        let anthropic = &config.providers["anthropic"];
        assert_eq!(anthropic.style, ProviderStyle::Anthropic);
        assert!(anthropic.api_key.is_some());
    }

    #[test]
    fn rejects_unknown_top_level_fields() {
        let result: Result<Config, _> = toml::from_str("unknown_section = true");

        assert!(result.is_err());
    }
}
