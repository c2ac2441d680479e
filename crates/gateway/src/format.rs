//! Managed request/response formats.
//!
//! Each wire format is modeled with its known fields typed and every other
//! top-level field preserved through a flattened [`UnknownFields`] bag, so a
//! parse → mutate → serialize cycle loses nothing the client sent.

pub mod anthropic;
pub mod convert;
pub mod managed;
pub mod openai_chat;
pub mod openai_responses;
pub mod unknown_fields;

pub use managed::{BuiltChoice, ManagedRequest, ManagedResponse, RequestFormat, TokenUsage};
pub use unknown_fields::UnknownFields;

use serde_json::{Map, Value};

/// Raw JSON object passed through the plugin pipeline.
pub type JsonMap = Map<String, Value>;
