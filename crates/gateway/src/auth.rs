//! Credential resolution for upstream providers.

use context::{Identity, RequestContext};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::{
    error::{GatewayError, GatewayResult},
    provider::ProviderHandle,
};

/// Resolves upstream credentials for a provider and scope.
///
/// Lookup order: the provider's configured key, then the
/// `<PROVIDER>_API_KEY` and `<PROVIDER>_KEY` environment variables with the
/// provider name uppercased and hyphens mapped to underscores.
#[derive(Debug, Default)]
pub struct AuthManager;

impl AuthManager {
    pub fn new() -> Self {
        Self
    }

    /// Collects the credential used to call `provider` for the given scope,
    /// recording a non-reversible key id on the request context.
    pub fn collect_target_auth(
        &self,
        scope: &str,
        provider: &ProviderHandle,
        context: &RequestContext,
    ) -> GatewayResult<SecretString> {
        let key = self.lookup(provider).ok_or_else(|| {
            GatewayError::Internal(format!(
                "No credentials for provider '{}' (scope '{scope}'): configure api_key or set {}_API_KEY",
                provider.name(),
                env_token(provider.name()),
            ))
        })?;

        context.set_identity(Identity {
            key_id: Some(key_id(key.expose_secret())),
            user_id: None,
        });

        Ok(key)
    }

    fn lookup(&self, provider: &ProviderHandle) -> Option<SecretString> {
        if let Some(key) = provider.configured_api_key() {
            return Some(key.clone());
        }

        let token = env_token(provider.name());

        for name in [format!("{token}_API_KEY"), format!("{token}_KEY")] {
            if let Ok(value) = std::env::var(&name)
                && !value.is_empty()
            {
                return Some(SecretString::from(value));
            }
        }

        None
    }
}

fn env_token(provider_name: &str) -> String {
    provider_name
        .chars()
        .map(|c| if c == '-' { '_' } else { c.to_ascii_uppercase() })
        .collect()
}

/// First 8 bytes of the SHA-256 of the key, hex encoded. Enough to correlate
/// usage without storing the credential anywhere.
fn key_id(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());

    digest[..8].iter().map(|byte| format!("{byte:02x}")).collect()
}
