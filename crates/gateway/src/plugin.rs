//! Plugin capability contracts.
//!
//! A plugin implements any subset of the hook traits and advertises them
//! through the capability accessors on [`Plugin`]. The chain precomputes, per
//! hook kind, the ordered list of instances that implement it, so the
//! executor only ever iterates relevant plugins.
//!
//! Hooks receive the pipeline request (original body, format, context) and
//! the evolving body separately: the body a hook returns is what the next
//! hook, and ultimately the upstream driver, sees.

pub mod chain;

use async_trait::async_trait;
use axum::response::Response;

use crate::{
    error::{GatewayError, GatewayResult},
    format::JsonMap,
    pipeline::{HandlerInvoker, PipelineRequest},
    provider::ProviderHandle,
};

/// Base contract every plugin implements. The capability accessors return
/// `self` for each hook the plugin supports.
pub trait Plugin: Send + Sync {
    /// Registered plugin name. Virtual-provider plugins use a `virtual:`
    /// prefix and are prepended to every chain.
    fn name(&self) -> &str;

    fn as_before(&self) -> Option<&dyn BeforePlugin> {
        None
    }

    fn as_after(&self) -> Option<&dyn AfterPlugin> {
        None
    }

    fn as_after_chunk(&self) -> Option<&dyn AfterChunkPlugin> {
        None
    }

    fn as_stream_end(&self) -> Option<&dyn StreamEndPlugin> {
        None
    }

    fn as_on_error(&self) -> Option<&dyn OnErrorPlugin> {
        None
    }

    fn as_recursive(&self) -> Option<&dyn RecursiveHandlerPlugin> {
        None
    }
}

/// Runs once before the upstream call; returns the body the next hook (and
/// ultimately the driver) sees. A failure fails the whole request.
#[async_trait]
pub trait BeforePlugin: Send + Sync {
    async fn before(
        &self,
        params: &str,
        provider: &ProviderHandle,
        request: &PipelineRequest,
        body: JsonMap,
    ) -> GatewayResult<JsonMap>;
}

/// Runs once on a successful non-streaming upstream response; returns the
/// replacement response map. A failure fails the whole request.
#[async_trait]
pub trait AfterPlugin: Send + Sync {
    async fn after(
        &self,
        params: &str,
        provider: &ProviderHandle,
        request: &PipelineRequest,
        body: &JsonMap,
        status: u16,
        response: JsonMap,
    ) -> GatewayResult<JsonMap>;
}

/// Runs per SSE event (excluding the terminator); returns the replacement
/// chunk. A failure drops only that chunk and the stream continues.
#[async_trait]
pub trait AfterChunkPlugin: Send + Sync {
    async fn after_chunk(
        &self,
        params: &str,
        provider: &ProviderHandle,
        request: &PipelineRequest,
        body: &JsonMap,
        chunk: JsonMap,
    ) -> GatewayResult<JsonMap>;
}

/// Runs once after the stream terminator with the last non-terminator chunk
/// (or an empty map if none arrived). Failures are logged only.
#[async_trait]
pub trait StreamEndPlugin: Send + Sync {
    async fn stream_end(
        &self,
        params: &str,
        provider: &ProviderHandle,
        request: &PipelineRequest,
        body: &JsonMap,
        last_chunk: &JsonMap,
    ) -> GatewayResult<()>;
}

/// Runs once when the upstream or the pipeline fails. Informational only:
/// failures are logged and the original error still surfaces.
#[async_trait]
pub trait OnErrorPlugin: Send + Sync {
    async fn on_error(
        &self,
        params: &str,
        provider: &ProviderHandle,
        request: &PipelineRequest,
        body: Option<&JsonMap>,
        error: &GatewayError,
    ) -> GatewayResult<()>;
}

/// Runs before the normal pipeline and may fully handle the request through
/// the invoker. `Ok(Some(response))` stops the normal pipeline; `Ok(None)`
/// lets it continue; `Err` means the plugin owned error handling.
#[async_trait]
pub trait RecursiveHandlerPlugin: Send + Sync {
    async fn handle(
        &self,
        params: &str,
        invoker: &HandlerInvoker<'_>,
        request: &PipelineRequest,
    ) -> GatewayResult<Option<Response>>;
}
