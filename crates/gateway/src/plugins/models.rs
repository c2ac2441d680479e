//! Aggregated model listing.
//!
//! Serves `GET /v1/models` by invoking every provider's `list_models`
//! capability and returning one combined list with provider-prefixed ids.
//! Providers that fail to answer are skipped; a partial list beats no list.

use std::sync::Arc;

use async_trait::async_trait;
use axum::response::Response;
use itertools::Itertools;
use serde_json::{Value, json};

use crate::{
    error::GatewayResult,
    pipeline::{Endpoint, HandlerInvoker, PipelineRequest, json_response},
    plugin::{Plugin, RecursiveHandlerPlugin},
    provider::{Command, LIST_MODELS_SCOPE, ProviderHandle},
};

/// Head plugin answering the models endpoint before the normal pipeline.
pub struct ModelsPlugin {
    providers: Vec<Arc<ProviderHandle>>,
}

impl ModelsPlugin {
    pub fn new(mut providers: Vec<Arc<ProviderHandle>>) -> Self {
        // Deterministic listing order regardless of registration order.
        providers.sort_by(|a, b| a.name().cmp(b.name()));

        Self { providers }
    }
}

impl Plugin for ModelsPlugin {
    fn name(&self) -> &str {
        "models"
    }

    fn as_recursive(&self) -> Option<&dyn RecursiveHandlerPlugin> {
        Some(self)
    }
}

#[async_trait]
impl RecursiveHandlerPlugin for ModelsPlugin {
    async fn handle(
        &self,
        _params: &str,
        _invoker: &HandlerInvoker<'_>,
        request: &PipelineRequest,
    ) -> GatewayResult<Option<Response>> {
        if request.endpoint != Endpoint::Models {
            return Ok(None);
        }

        let mut data = Vec::new();

        for provider in &self.providers {
            if let Some(hint) = &request.provider_hint
                && hint != provider.name()
            {
                continue;
            }

            let Some(Command::ListModels(list)) = provider.command(LIST_MODELS_SCOPE) else {
                continue;
            };

            match list.list_models(provider, &request.context).await {
                Ok(models) => {
                    data.extend(models.into_iter().map(|model| {
                        json!({
                            "id": format!("{}/{}", provider.name(), model.id),
                            "object": "model",
                            "created": model.created.unwrap_or(0),
                            "owned_by": model.owned_by.unwrap_or_else(|| provider.name().to_string()),
                        })
                    }));
                }
                Err(error) => {
                    log::warn!("Model listing failed for '{}': {error}", provider.name());
                }
            }
        }

        log::debug!(
            "Listing {} models from providers [{}]",
            data.len(),
            self.providers.iter().map(|provider| provider.name()).join(", ")
        );

        let body = json!({"object": "list", "data": Value::Array(data)})
            .as_object()
            .cloned()
            .unwrap_or_default();

        json_response(200, &body).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use config::ProviderStyle;
    use context::RequestContext;

    use crate::{error::GatewayError, provider::ListModels, provider::ModelEntry};

    struct StaticModels(Vec<&'static str>);

    #[async_trait]
    impl ListModels for StaticModels {
        async fn list_models(
            &self,
            _provider: &ProviderHandle,
            _context: &RequestContext,
        ) -> GatewayResult<Vec<ModelEntry>> {
            Ok(self
                .0
                .iter()
                .map(|id| ModelEntry {
                    id: id.to_string(),
                    owned_by: None,
                    created: None,
                })
                .collect())
        }
    }

    struct BrokenModels;

    #[async_trait]
    impl ListModels for BrokenModels {
        async fn list_models(
            &self,
            _provider: &ProviderHandle,
            _context: &RequestContext,
        ) -> GatewayResult<Vec<ModelEntry>> {
            Err(GatewayError::Connection("unreachable".into()))
        }
    }

    fn provider(name: &str, list: Arc<dyn ListModels>) -> Arc<ProviderHandle> {
        let mut commands = HashMap::new();
        commands.insert(LIST_MODELS_SCOPE.to_string(), Command::ListModels(list));

        Arc::new(ProviderHandle::for_tests(name, ProviderStyle::OpenAi, commands))
    }

    #[test]
    fn listing_order_is_sorted_by_provider_name() {
        let plugin = ModelsPlugin::new(vec![
            provider("zeta", Arc::new(StaticModels(vec!["m1"]))),
            provider("alpha", Arc::new(StaticModels(vec!["m2"]))),
        ]);

        let names: Vec<_> = plugin.providers.iter().map(|p| p.name().to_string()).collect();

        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
