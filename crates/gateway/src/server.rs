//! Gateway assembly: provider registration, plugin registry, HTTP dispatch.

use std::{collections::HashMap, sync::Arc};

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
};
use config::Config;
use context::RequestContext;

use crate::{
    auth::AuthManager,
    error::GatewayResult,
    format::{JsonMap, managed},
    pipeline::{Endpoint, PipelineRequest},
    plugin::chain::PluginRegistry,
    plugins,
    provider::{ChatDriver, ProviderHandle, http::HttpChatDriver},
};

/// The assembled gateway: immutable provider handles, the plugin registry and
/// the upstream driver. Shared as `Arc` across request handlers.
pub struct Gateway {
    providers: HashMap<String, Arc<ProviderHandle>>,
    registry: Arc<PluginRegistry>,
    driver: Arc<dyn ChatDriver>,
    auth: Arc<AuthManager>,
}

impl Gateway {
    pub fn builder(config: &Config) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    pub(crate) fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub(crate) fn driver(&self) -> &Arc<dyn ChatDriver> {
        &self.driver
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    pub fn provider(&self, name: &str) -> Option<Arc<ProviderHandle>> {
        self.providers.get(name).cloned()
    }

    pub fn providers(&self) -> impl Iterator<Item = &Arc<ProviderHandle>> {
        self.providers.values()
    }
}

/// Builds a [`Gateway`] from configuration, with injection points for the
/// driver and the analytics sink.
pub struct GatewayBuilder {
    config: Config,
    driver: Option<Arc<dyn ChatDriver>>,
    sink: Option<Arc<dyn plugins::posthog::AnalyticsSink>>,
    extra_plugins: Vec<Arc<dyn crate::plugin::Plugin>>,
}

impl GatewayBuilder {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            driver: None,
            sink: None,
            extra_plugins: Vec::new(),
        }
    }

    /// Replaces the default HTTP driver. Tests use this to avoid the network.
    pub fn with_driver(mut self, driver: Arc<dyn ChatDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Replaces the default analytics sink.
    pub fn with_sink(mut self, sink: Arc<dyn plugins::posthog::AnalyticsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Registers an additional plugin after the built-in set.
    pub fn with_plugin(mut self, plugin: Arc<dyn crate::plugin::Plugin>) -> Self {
        self.extra_plugins.push(plugin);
        self
    }

    pub fn build(self) -> GatewayResult<Gateway> {
        let auth = Arc::new(AuthManager::new());

        let mut providers = HashMap::new();

        for (name, provider_config) in &self.config.providers {
            let handle = ProviderHandle::from_config(name, provider_config, auth.clone())?;
            log::debug!("Registered provider '{}' at {}", handle.name(), handle.base_url());
            providers.insert(handle.name().to_string(), Arc::new(handle));
        }

        let driver = self.driver.unwrap_or_else(|| Arc::new(HttpChatDriver::new()));

        let sink = self
            .sink
            .unwrap_or_else(|| plugins::posthog::sink_from_config(&self.config.posthog));

        let mut registry = PluginRegistry::new(self.config.plugins.head.clone(), self.config.plugins.tail.clone());

        registry.register(Arc::new(plugins::fallback::FallbackPlugin::new()));
        registry.register(Arc::new(plugins::parallel::ParallelPlugin::new()));
        registry.register(Arc::new(plugins::models::ModelsPlugin::new(
            providers.values().cloned().collect(),
        )));
        registry.register(Arc::new(plugins::fuzz::FuzzPlugin::new()));

        for variant in plugins::zip::ZipVariant::ALL {
            registry.register(Arc::new(plugins::zip::ZipPlugin::new(variant, driver.clone())));
        }

        registry.register(Arc::new(plugins::posthog::PosthogPlugin::new(
            sink,
            self.config.posthog.include_content,
        )));

        for plugin in self.extra_plugins {
            registry.register(plugin);
        }

        Ok(Gateway {
            providers,
            registry: Arc::new(registry),
            driver,
            auth,
        })
    }
}

/// Creates an axum router serving the gateway endpoints.
pub fn router(config: &Config) -> anyhow::Result<Router> {
    let gateway = Arc::new(
        Gateway::builder(config)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to initialize gateway: {e}"))?,
    );

    let health_path = config.server.health_path_or_default().to_string();

    Ok(Router::new()
        .route(&health_path, get(|| async { StatusCode::OK }))
        .fallback(dispatch)
        .with_state(gateway))
}

/// Catch-all handler: parses the plugin path and endpoint out of the URL and
/// hands the request to the pipeline executor.
async fn dispatch(State(gateway): State<Arc<Gateway>>, method: Method, uri: Uri, body: Bytes) -> Response {
    let path = uri.path().to_string();

    let Some(parsed) = parse_path(&gateway, &path) else {
        log::debug!("No gateway endpoint in path '{path}'");
        return StatusCode::NOT_FOUND.into_response();
    };

    let expected_method = match parsed.endpoint {
        Endpoint::Models => Method::GET,
        _ => Method::POST,
    };

    if method != expected_method {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let body = if parsed.endpoint == Endpoint::Models {
        JsonMap::new()
    } else {
        match managed::parse_body(&body) {
            Ok(body) => body,
            Err(error) => return error.into_response(),
        }
    };

    let context = Arc::new(RequestContext::new());

    log::debug!(
        "Dispatching {:?} request, trace_id={}, provider_hint={:?}, plugins={:?}",
        parsed.endpoint,
        context.trace_id,
        parsed.provider_hint,
        parsed.plugin_segments,
    );

    let request = PipelineRequest::new(
        parsed.endpoint,
        parsed.plugin_segments,
        parsed.provider_hint,
        body,
        context,
    );

    match gateway.execute(request).await {
        Ok(response) => response,
        Err(error) => {
            log::debug!("Request failed: {error}");
            error.into_response()
        }
    }
}

struct ParsedPath {
    endpoint: Endpoint,
    provider_hint: Option<String>,
    plugin_segments: Vec<String>,
}

/// Splits a URL path into leading provider/plugin segments and the `/v1/...`
/// endpoint. The first leading segment naming a registered provider selects
/// it; everything else resolves as plugins.
fn parse_path(gateway: &Gateway, path: &str) -> Option<ParsedPath> {
    let segments: Vec<&str> = path.split('/').filter(|segment| !segment.is_empty()).collect();

    let v1 = segments.iter().position(|segment| *segment == "v1")?;

    let endpoint = match &segments[v1 + 1..] {
        ["chat", "completions"] => Endpoint::ChatCompletions,
        ["messages"] => Endpoint::Messages,
        ["responses"] => Endpoint::Responses,
        ["models"] => Endpoint::Models,
        _ => return None,
    };

    let mut provider_hint = None;
    let mut plugin_segments = Vec::new();

    for segment in &segments[..v1] {
        if provider_hint.is_none() && gateway.provider(segment).is_some() {
            provider_hint = Some(segment.to_string());
            continue;
        }

        plugin_segments.push(segment.to_string());
    }

    Some(ParsedPath {
        endpoint,
        provider_hint,
        plugin_segments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn test_gateway() -> Gateway {
        let config: Config = toml::from_str(indoc! {r#"
            [providers.openai]
            style = "openai"
            base_url = "https://api.openai.com/v1"
        "#})
        .unwrap();

        Gateway::builder(&config).build().unwrap()
    }

    #[test]
    fn parses_plugin_path_and_endpoint() {
        let gateway = test_gateway();

        let parsed = parse_path(&gateway, "/fuzz/zip:1024/v1/chat/completions").unwrap();

        assert_eq!(parsed.endpoint, Endpoint::ChatCompletions);
        assert_eq!(parsed.provider_hint, None);
        assert_eq!(parsed.plugin_segments, vec!["fuzz".to_string(), "zip:1024".to_string()]);
    }

    #[test]
    fn first_provider_segment_selects_the_provider() {
        let gateway = test_gateway();

        let parsed = parse_path(&gateway, "/openai/zip/v1/messages").unwrap();

        assert_eq!(parsed.endpoint, Endpoint::Messages);
        assert_eq!(parsed.provider_hint.as_deref(), Some("openai"));
        assert_eq!(parsed.plugin_segments, vec!["zip".to_string()]);
    }

    #[test]
    fn unknown_endpoints_are_rejected() {
        let gateway = test_gateway();

        assert!(parse_path(&gateway, "/v1/embeddings").is_none());
        assert!(parse_path(&gateway, "/nothing/here").is_none());
    }

    #[test]
    fn models_endpoint_parses_without_body() {
        let gateway = test_gateway();

        let parsed = parse_path(&gateway, "/v1/models").unwrap();

        assert_eq!(parsed.endpoint, Endpoint::Models);
    }
}
