use std::path::Path;

use anyhow::bail;
use indoc::indoc;
use secrecy::SecretString;

use crate::Config;

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let mut config: Config = toml::from_str(&content)?;

    apply_env_overrides(&mut config);
    validate_has_providers(&config)?;

    Ok(config)
}

/// Environment variables win over file values for the PostHog section.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(key) = std::env::var("POSTHOG_API_KEY")
        && !key.is_empty()
    {
        config.posthog.api_key = Some(SecretString::from(key));
    }

    if let Ok(url) = std::env::var("POSTHOG_BASE_URL")
        && !url.is_empty()
    {
        config.posthog.base_url = Some(url);
    }

    if let Ok(include) = std::env::var("POSTHOG_INCLUDE_CONTENT") {
        config.posthog.include_content = matches!(include.as_str(), "1" | "true" | "TRUE" | "yes");
    }
}

pub(crate) fn validate_has_providers(config: &Config) -> anyhow::Result<()> {
    if config.providers.is_empty() {
        bail!(indoc! {r#"
            No providers configured. Switchboard requires at least one upstream provider to function.

            Example configuration:

              [providers.openai]
              style = "openai"
              base_url = "https://api.openai.com/v1"
        "#});
    }

    for (name, provider) in &config.providers {
        if name.is_empty() || name.chars().any(|c| c.is_ascii_uppercase() || c == '/') {
            bail!("Provider name '{name}' must be a lowercase token without slashes");
        }

        if let Some(base_url) = &provider.base_url
            && url::Url::parse(base_url).is_err()
        {
            bail!("Provider '{name}' has an invalid base_url: {base_url}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use insta::assert_snapshot;

    use crate::Config;

    #[test]
    fn validation_rejects_empty_provider_table() {
        let config = Config::default();
        let error = super::validate_has_providers(&config).unwrap_err().to_string();

        assert_snapshot!(error, @r#"
        No providers configured. Switchboard requires at least one upstream provider to function.

        Example configuration:

          [providers.openai]
          style = "openai"
          base_url = "https://api.openai.com/v1"
        "#);
    }

    #[test]
    fn validation_rejects_uppercase_provider_name() {
        let config: Config = toml::from_str(indoc! {r#"
            [providers.OpenAI]
            style = "openai"
        "#})
        .unwrap();

        let error = super::validate_has_providers(&config).unwrap_err().to_string();
        assert_snapshot!(error, @"Provider name 'OpenAI' must be a lowercase token without slashes");
    }

    #[test]
    fn validation_rejects_invalid_base_url() {
        let config: Config = toml::from_str(indoc! {r#"
            [providers.openai]
            style = "openai"
            base_url = "not a url"
        "#})
        .unwrap();

        let error = super::validate_has_providers(&config).unwrap_err().to_string();
        assert_snapshot!(error, @"Provider 'openai' has an invalid base_url: not a url");
    }

    #[test]
    fn validation_accepts_configured_provider() {
        let config: Config = toml::from_str(indoc! {r#"
            [providers.cloudflare]
            style = "openai"
            base_url = "https://gateway.ai.cloudflare.com/v1"
        "#})
        .unwrap();

        assert!(super::validate_has_providers(&config).is_ok());
    }
}
