//! Sequential provider failover.
//!
//! Activated with params listing `provider/model` targets, e.g.
//! `+fallback:openai/gpt-4o,anthropic/claude-3-haiku`. Targets are tried in
//! order through the invoker; the first success is written to the client and
//! the last failure surfaces when every target fails.

use async_trait::async_trait;
use axum::response::Response;

use crate::{
    error::{GatewayError, GatewayResult},
    pipeline::{HandlerInvoker, PipelineRequest},
    plugin::{Plugin, RecursiveHandlerPlugin},
};

#[derive(Default)]
pub struct FallbackPlugin;

impl FallbackPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Plugin for FallbackPlugin {
    fn name(&self) -> &str {
        "virtual:fallback"
    }

    fn as_recursive(&self) -> Option<&dyn RecursiveHandlerPlugin> {
        Some(self)
    }
}

/// Splits a params string into non-empty, trimmed targets.
pub(crate) fn parse_targets(params: &str) -> Vec<&str> {
    params
        .split(',')
        .map(str::trim)
        .filter(|target| !target.is_empty())
        .collect()
}

#[async_trait]
impl RecursiveHandlerPlugin for FallbackPlugin {
    async fn handle(
        &self,
        params: &str,
        invoker: &HandlerInvoker<'_>,
        request: &PipelineRequest,
    ) -> GatewayResult<Option<Response>> {
        let targets = parse_targets(params);

        if targets.is_empty() {
            return Ok(None);
        }

        let mut last_error = None;

        for target in &targets {
            log::debug!("Fallback attempting target '{target}'");

            match invoker.invoke_handler(request.with_model(target)).await {
                Ok(response) if response.status().is_success() => {
                    return Ok(Some(response));
                }
                Ok(response) => {
                    log::warn!("Fallback target '{target}' answered {}", response.status());
                    last_error = Some(GatewayError::Internal(format!(
                        "Fallback target '{target}' answered {}",
                        response.status()
                    )));
                }
                Err(error) => {
                    log::warn!("Fallback target '{target}' failed: {error}");
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| GatewayError::Internal("no fallback target succeeded".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_parsing_skips_empty_entries() {
        assert_eq!(
            parse_targets("openai/gpt-4o, anthropic/claude-3-haiku,,"),
            vec!["openai/gpt-4o", "anthropic/claude-3-haiku"]
        );
        assert!(parse_targets("").is_empty());
    }
}
