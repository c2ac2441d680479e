//! Plugin registry and chain resolution.
//!
//! A chain is built per request from four ordered sources: virtual plugins,
//! the configured head list, URL path segments, model-suffix entries, and the
//! configured tail list. Order is significant and duplicates are allowed.

use std::sync::Arc;

use super::Plugin;

/// Prefix marking virtual-provider plugins, prepended to every chain.
pub const VIRTUAL_PREFIX: &str = "virtual:";

/// One plugin paired with its params string (the colon-suffix argument of a
/// path segment or model-suffix entry).
#[derive(Clone)]
pub struct PluginInstance {
    pub plugin: Arc<dyn Plugin>,
    pub params: String,
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.params.is_empty() {
            write!(f, "{}", self.plugin.name())
        } else {
            write!(f, "{}:{}", self.plugin.name(), self.params)
        }
    }
}

/// Process-wide plugin registry, populated once at startup.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
    head: Vec<String>,
    tail: Vec<String>,
}

impl PluginRegistry {
    pub fn new(head: Vec<String>, tail: Vec<String>) -> Self {
        Self {
            plugins: Vec::new(),
            head,
            tail,
        }
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Looks a plugin up by name. Virtual plugins also resolve under their
    /// short name, so `fallback:a,b` in a URL reaches `virtual:fallback`.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Plugin>> {
        self.plugins
            .iter()
            .find(|plugin| plugin.name() == name)
            .or_else(|| {
                self.plugins
                    .iter()
                    .find(|plugin| plugin.name().strip_prefix(VIRTUAL_PREFIX) == Some(name))
            })
    }

    /// Builds the chain for one request from the URL path segments (already
    /// stripped of the provider segment and the endpoint) and the
    /// client-supplied model string.
    pub fn resolve_chain(&self, path_segments: &[&str], model: &str) -> Chain {
        let mut instances = Vec::new();

        // Virtual-provider plugins run first, unconditionally.
        for plugin in &self.plugins {
            if plugin.name().starts_with(VIRTUAL_PREFIX) && plugin.as_recursive().is_some() {
                instances.push(PluginInstance {
                    plugin: plugin.clone(),
                    params: String::new(),
                });
            }
        }

        for name in &self.head {
            self.push_instance(&mut instances, name, "");
        }

        for segment in path_segments {
            let (name, params) = split_entry(segment);
            self.push_instance(&mut instances, name, params);
        }

        for entry in model_suffix_entries(model) {
            let (name, params) = split_entry(entry);
            self.push_instance(&mut instances, name, params);
        }

        for name in &self.tail {
            self.push_instance(&mut instances, name, "");
        }

        Chain::new(instances)
    }

    fn push_instance(&self, instances: &mut Vec<PluginInstance>, name: &str, params: &str) {
        if name.is_empty() {
            return;
        }

        let Some(plugin) = self.get(name) else {
            // Unknown names are silently skipped; path segments routinely
            // carry things that are not plugins.
            log::debug!("Skipping unknown plugin '{name}'");
            return;
        };

        instances.push(PluginInstance {
            plugin: plugin.clone(),
            params: params.to_string(),
        });
    }
}

/// Splits `name[:params]`, keeping everything after the first colon as params.
fn split_entry(entry: &str) -> (&str, &str) {
    match entry.split_once(':') {
        Some((name, params)) => (name, params),
        None => (entry, ""),
    }
}

/// Model-suffix plugin entries: everything after the first `+`, split on `+`.
pub fn model_suffix_entries(model: &str) -> impl Iterator<Item = &str> {
    model
        .split_once('+')
        .map(|(_, suffix)| suffix)
        .unwrap_or("")
        .split('+')
        .filter(|entry| !entry.is_empty())
}

/// The model string without its plugin suffix.
pub fn strip_model_suffix(model: &str) -> &str {
    model.split_once('+').map(|(model, _)| model).unwrap_or(model)
}

/// Ordered plugin instances for one request, with per-hook index lists
/// precomputed at build time.
pub struct Chain {
    instances: Vec<PluginInstance>,
    before: Vec<usize>,
    after: Vec<usize>,
    after_chunk: Vec<usize>,
    stream_end: Vec<usize>,
    on_error: Vec<usize>,
    recursive: Vec<usize>,
}

impl Chain {
    fn new(instances: Vec<PluginInstance>) -> Self {
        let mut before = Vec::new();
        let mut after = Vec::new();
        let mut after_chunk = Vec::new();
        let mut stream_end = Vec::new();
        let mut on_error = Vec::new();
        let mut recursive = Vec::new();

        for (index, instance) in instances.iter().enumerate() {
            if instance.plugin.as_before().is_some() {
                before.push(index);
            }
            if instance.plugin.as_after().is_some() {
                after.push(index);
            }
            if instance.plugin.as_after_chunk().is_some() {
                after_chunk.push(index);
            }
            if instance.plugin.as_stream_end().is_some() {
                stream_end.push(index);
            }
            if instance.plugin.as_on_error().is_some() {
                on_error.push(index);
            }
            if instance.plugin.as_recursive().is_some() {
                recursive.push(index);
            }
        }

        Self {
            instances,
            before,
            after,
            after_chunk,
            stream_end,
            on_error,
            recursive,
        }
    }

    pub fn instances(&self) -> &[PluginInstance] {
        &self.instances
    }

    pub fn befores(&self) -> impl Iterator<Item = &PluginInstance> {
        self.before.iter().map(|&index| &self.instances[index])
    }

    pub fn afters(&self) -> impl Iterator<Item = &PluginInstance> {
        self.after.iter().map(|&index| &self.instances[index])
    }

    pub fn after_chunks(&self) -> impl Iterator<Item = &PluginInstance> {
        self.after_chunk.iter().map(|&index| &self.instances[index])
    }

    pub fn stream_ends(&self) -> impl Iterator<Item = &PluginInstance> {
        self.stream_end.iter().map(|&index| &self.instances[index])
    }

    pub fn on_errors(&self) -> impl Iterator<Item = &PluginInstance> {
        self.on_error.iter().map(|&index| &self.instances[index])
    }

    pub fn recursives(&self) -> impl Iterator<Item = &PluginInstance> {
        self.recursive.iter().map(|&index| &self.instances[index])
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.instances.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::response::Response;

    use crate::{
        error::GatewayResult,
        pipeline::{HandlerInvoker, PipelineRequest},
        plugin::{Plugin, RecursiveHandlerPlugin},
    };

    struct NamedPlugin {
        name: &'static str,
    }

    impl Plugin for NamedPlugin {
        fn name(&self) -> &str {
            self.name
        }
    }

    struct VirtualPlugin {
        name: &'static str,
    }

    impl Plugin for VirtualPlugin {
        fn name(&self) -> &str {
            self.name
        }

        fn as_recursive(&self) -> Option<&dyn RecursiveHandlerPlugin> {
            Some(self)
        }
    }

    #[async_trait]
    impl RecursiveHandlerPlugin for VirtualPlugin {
        async fn handle(
            &self,
            _params: &str,
            _invoker: &HandlerInvoker<'_>,
            _request: &PipelineRequest,
        ) -> GatewayResult<Option<Response>> {
            Ok(None)
        }
    }

    fn registry() -> PluginRegistry {
        let mut registry = PluginRegistry::new(vec!["models".to_string()], vec!["posthog".to_string()]);

        registry.register(Arc::new(VirtualPlugin { name: "virtual:fallback" }));
        registry.register(Arc::new(VirtualPlugin { name: "virtual:parallel" }));
        registry.register(Arc::new(NamedPlugin { name: "models" }));
        registry.register(Arc::new(NamedPlugin { name: "fuzz" }));
        registry.register(Arc::new(NamedPlugin { name: "zip" }));
        registry.register(Arc::new(NamedPlugin { name: "posthog" }));

        registry
    }

    fn chain_names(chain: &Chain) -> Vec<String> {
        chain.instances().iter().map(|i| format!("{i:?}")).collect()
    }

    #[test]
    fn resolves_path_and_suffix_plugins_in_order() {
        let registry = registry();
        let chain = registry.resolve_chain(&["fuzz", "zip:1024"], "gpt-4+posthog");

        insta::assert_debug_snapshot!(chain_names(&chain), @r#"
        [
            "virtual:fallback",
            "virtual:parallel",
            "models",
            "fuzz",
            "zip:1024",
            "posthog",
            "posthog",
        ]
        "#);
    }

    #[test]
    fn skips_unknown_and_empty_names() {
        let registry = registry();
        let chain = registry.resolve_chain(&["nope", "", ":123", "zip"], "gpt-4");

        insta::assert_debug_snapshot!(chain_names(&chain), @r#"
        [
            "virtual:fallback",
            "virtual:parallel",
            "models",
            "zip",
            "posthog",
        ]
        "#);
    }

    #[test]
    fn virtual_plugins_resolve_under_short_names() {
        let registry = registry();
        let chain = registry.resolve_chain(&[], "gpt-4+fallback:openai/gpt-4o,anthropic/claude");

        let names = chain_names(&chain);
        assert!(names.contains(&"virtual:fallback:openai/gpt-4o,anthropic/claude".to_string()));
    }

    #[test]
    fn suffix_entries_and_strip() {
        let entries: Vec<_> = model_suffix_entries("gpt-4+zip:512+posthog").collect();

        assert_eq!(entries, vec!["zip:512", "posthog"]);
        assert_eq!(strip_model_suffix("gpt-4+zip:512+posthog"), "gpt-4");
        assert_eq!(strip_model_suffix("gpt-4"), "gpt-4");
    }

    #[test]
    fn params_keep_everything_after_first_colon() {
        assert_eq!(split_entry("zip:65535"), ("zip", "65535"));
        assert_eq!(split_entry("fallback:a/b,c/d"), ("fallback", "a/b,c/d"));
        assert_eq!(split_entry("posthog"), ("posthog", ""));
        assert_eq!(split_entry(":orphan"), ("", "orphan"));
    }

    #[test]
    fn capability_lists_only_contain_implementers() {
        let registry = registry();
        let chain = registry.resolve_chain(&[], "gpt-4");

        assert_eq!(chain.recursives().count(), 2);
        assert_eq!(chain.befores().count(), 0);
    }
}
