//! Fuzzy model-name resolution.
//!
//! Clients often send shortened model aliases (`gpt-4o-mini`) where the
//! provider expects a dated id (`gpt-4o-mini-2024-07-18`). The resolver asks
//! the provider's `list_models` capability once per alias, picks the first id
//! containing the requested string, and memoizes the answer per provider.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::{
    error::GatewayResult,
    format::JsonMap,
    pipeline::PipelineRequest,
    plugin::{BeforePlugin, Plugin},
    provider::{Command, LIST_MODELS_SCOPE, ProviderHandle},
};

/// Substring-matching model alias resolver.
#[derive(Default)]
pub struct FuzzPlugin {
    /// `"{provider}_{alias}"` to the resolved model id. Never expires.
    cache: DashMap<String, String>,
}

impl FuzzPlugin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Plugin for FuzzPlugin {
    fn name(&self) -> &str {
        "fuzz"
    }

    fn as_before(&self) -> Option<&dyn BeforePlugin> {
        Some(self)
    }
}

#[async_trait]
impl BeforePlugin for FuzzPlugin {
    async fn before(
        &self,
        _params: &str,
        provider: &ProviderHandle,
        request: &PipelineRequest,
        mut body: JsonMap,
    ) -> GatewayResult<JsonMap> {
        let Some(model) = body.get("model").and_then(Value::as_str).map(str::to_string) else {
            return Ok(body);
        };

        if model.is_empty() {
            return Ok(body);
        }

        let key = format!("{}_{}", provider.name(), model);

        if let Some(resolved) = self.cache.get(&key) {
            body.insert("model".to_string(), Value::String(resolved.value().clone()));
            return Ok(body);
        }

        let Some(Command::ListModels(list)) = provider.command(LIST_MODELS_SCOPE) else {
            return Ok(body);
        };

        let models = match list.list_models(provider, &request.context).await {
            Ok(models) => models,
            Err(error) => {
                // Resolution is best-effort; the original model goes upstream.
                log::warn!("Model listing failed for '{}': {error}", provider.name());
                return Ok(body);
            }
        };

        let Some(resolved) = models.iter().find(|entry| entry.id.contains(&model)) else {
            log::debug!("No model id containing '{model}' at '{}'", provider.name());
            return Ok(body);
        };

        log::debug!("Resolved model '{model}' to '{}'", resolved.id);

        self.cache.insert(key, resolved.id.clone());
        body.insert("model".to_string(), Value::String(resolved.id.clone()));

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::HashMap,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use config::ProviderStyle;
    use context::RequestContext;
    use serde_json::json;

    use crate::{
        pipeline::Endpoint,
        provider::{ListModels, ModelEntry},
    };

    struct StaticModels {
        ids: Vec<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ListModels for StaticModels {
        async fn list_models(
            &self,
            _provider: &ProviderHandle,
            _context: &RequestContext,
        ) -> GatewayResult<Vec<ModelEntry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            Ok(self
                .ids
                .iter()
                .map(|id| ModelEntry {
                    id: id.to_string(),
                    owned_by: None,
                    created: None,
                })
                .collect())
        }
    }

    fn provider_with(ids: Vec<&'static str>) -> (ProviderHandle, Arc<StaticModels>) {
        let list = Arc::new(StaticModels {
            ids,
            calls: AtomicUsize::new(0),
        });

        let mut commands = HashMap::new();
        commands.insert(LIST_MODELS_SCOPE.to_string(), Command::ListModels(list.clone()));

        (
            ProviderHandle::for_tests("openai", ProviderStyle::OpenAi, commands),
            list,
        )
    }

    fn request_with_model(model: &str) -> (PipelineRequest, JsonMap) {
        let body = json!({"model": model, "messages": []}).as_object().unwrap().clone();

        let request = PipelineRequest::new(
            Endpoint::ChatCompletions,
            Vec::new(),
            None,
            body.clone(),
            Arc::new(RequestContext::new()),
        );

        (request, body)
    }

    #[tokio::test]
    async fn resolves_alias_and_memoizes() {
        let (provider, list) = provider_with(vec!["gpt-4o-mini-2024-07-18"]);
        let plugin = FuzzPlugin::new();

        let (request, body) = request_with_model("gpt-4o-mini");

        let resolved = plugin.before("", &provider, &request, body.clone()).await.unwrap();
        assert_eq!(resolved["model"], json!("gpt-4o-mini-2024-07-18"));
        assert_eq!(list.calls.load(Ordering::SeqCst), 1);

        // Second request with the same alias never touches list_models.
        let resolved = plugin.before("", &provider, &request, body).await.unwrap();
        assert_eq!(resolved["model"], json!("gpt-4o-mini-2024-07-18"));
        assert_eq!(list.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn first_listed_match_wins() {
        let (provider, _) = provider_with(vec!["gpt-4-turbo-2024-04-09", "gpt-4-turbo-preview", "gpt-3.5"]);
        let plugin = FuzzPlugin::new();

        let (request, body) = request_with_model("gpt-4-turbo");

        let resolved = plugin.before("", &provider, &request, body).await.unwrap();

        assert_eq!(resolved["model"], json!("gpt-4-turbo-2024-04-09"));
    }

    #[tokio::test]
    async fn no_match_passes_through() {
        let (provider, _) = provider_with(vec!["claude-3-haiku"]);
        let plugin = FuzzPlugin::new();

        let (request, body) = request_with_model("gpt-4");

        let resolved = plugin.before("", &provider, &request, body.clone()).await.unwrap();

        assert_eq!(resolved, body);
    }

    #[tokio::test]
    async fn missing_capability_passes_through() {
        let provider = ProviderHandle::for_tests("bare", ProviderStyle::OpenAi, HashMap::new());
        let plugin = FuzzPlugin::new();

        let (request, body) = request_with_model("gpt-4");

        let resolved = plugin.before("", &provider, &request, body.clone()).await.unwrap();

        assert_eq!(resolved, body);
    }
}
