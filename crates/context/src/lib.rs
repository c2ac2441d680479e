//! Per-request state shared between the gateway pipeline and its plugins.
//!
//! The context is created once per incoming HTTP request and passed by
//! reference through every plugin hook. All fields are typed; plugins never
//! exchange data through string-keyed maps.

mod accumulator;

pub use accumulator::{ChoiceAccumulator, StreamAccumulator, ToolCallAccumulator};

use std::sync::{Mutex, OnceLock};
use std::time::Instant;

/// Identity attached to a request by the auth manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// Non-reversible identifier of the credential used upstream.
    pub key_id: Option<String>,
    /// End-user identifier, when the credential source knows one.
    pub user_id: Option<String>,
}

/// Telemetry state initialized by the observability plugin's `Before` hook.
#[derive(Debug)]
pub struct RequestTelemetry {
    /// Wall-clock start of the request, for latency measurement.
    pub started_at: Instant,
    /// Streaming-aware accumulator merging chunks into a final response.
    pub accumulator: Mutex<StreamAccumulator>,
    emitted: Mutex<bool>,
}

impl RequestTelemetry {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            accumulator: Mutex::new(StreamAccumulator::default()),
            emitted: Mutex::new(false),
        }
    }

    /// Marks the analytics event as emitted. Returns `false` if it already was,
    /// so exactly one caller wins per request.
    pub fn try_mark_emitted(&self) -> bool {
        let mut emitted = self.emitted.lock().unwrap_or_else(|e| e.into_inner());
        if *emitted {
            return false;
        }
        *emitted = true;
        true
    }
}

/// Runtime context carried through one gateway request.
#[derive(Debug)]
pub struct RequestContext {
    /// Correlation id attached to logs and analytics events.
    pub trace_id: String,
    identity: OnceLock<Identity>,
    telemetry: OnceLock<RequestTelemetry>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            identity: OnceLock::new(),
            telemetry: OnceLock::new(),
        }
    }

    /// Records the identity resolved by the auth manager. First write wins.
    pub fn set_identity(&self, identity: Identity) {
        let _ = self.identity.set(identity);
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.get()
    }

    /// Initializes the telemetry state, returning the existing one if a
    /// previous hook already did.
    pub fn init_telemetry(&self) -> &RequestTelemetry {
        self.telemetry.get_or_init(RequestTelemetry::new)
    }

    pub fn telemetry(&self) -> Option<&RequestTelemetry> {
        self.telemetry.get()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
