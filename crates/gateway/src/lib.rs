//! Unified chat-completions gateway core.
//!
//! Clients speak one of three canonical request shapes (OpenAI chat
//! completions, OpenAI responses, Anthropic messages); the gateway resolves a
//! plugin chain from the URL path and the model suffix, selects an upstream
//! provider, runs the pipeline and streams or returns the result.
//!
//! ```text
//! request → chain resolution → recursive handlers → Before hooks
//!         → upstream driver → After / AfterChunk / StreamEnd hooks → client
//! ```

pub mod auth;
pub mod format;
pub mod pipeline;
pub mod plugin;
pub mod plugins;
pub mod provider;

mod error;
mod http_client;
mod server;

pub use error::{GatewayError, GatewayResult};
pub use server::{Gateway, GatewayBuilder, router};
