//! Plugin chain configuration.

use serde::Deserialize;

/// Fixed head and tail plugin lists applied to every request chain.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PluginsConfig {
    /// Plugins prepended to every chain, in declared order.
    pub head: Vec<String>,
    /// Plugins appended to every chain, in declared order.
    pub tail: Vec<String>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            head: vec!["models".to_string()],
            tail: vec!["posthog".to_string()],
        }
    }
}
