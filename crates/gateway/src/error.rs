use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Gateway errors with appropriate HTTP status codes.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed request JSON or invalid parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Provider not found in configuration.
    #[error("Provider '{0}' not found")]
    ProviderNotFound(String),

    /// No provider could be determined from the URL or model string.
    #[error("No provider selected: prefix the path or the model with a provider name")]
    NoProviderSelected,

    /// Upstream returned a non-2xx response. Status and body pass through
    /// verbatim to the client.
    #[error("Upstream error ({status})")]
    Upstream { status: u16, body: Map<String, Value> },

    /// Network failure talking to the upstream.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Upstream produced a body the gateway could not parse.
    #[error("Upstream response could not be parsed: {0}")]
    UpstreamParse(String),

    /// A plugin hook failed.
    #[error("Plugin '{plugin}' failed: {message}")]
    Plugin { plugin: String, message: String },

    /// Recursion depth exceeded while virtual plugins re-entered the pipeline.
    #[error("Handler recursion limit exceeded")]
    RecursionLimit,

    /// Internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Get the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::ProviderNotFound(_) | Self::NoProviderSelected => StatusCode::BAD_REQUEST,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Connection(_) | Self::UpstreamParse(_) => StatusCode::BAD_GATEWAY,
            Self::Plugin { .. } | Self::RecursionLimit | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Shorthand for a plugin hook failure.
    pub fn plugin(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Plugin {
            plugin: plugin.into(),
            message: message.into(),
        }
    }
}

/// Error envelope returned to clients.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    code: u16,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Upstream bodies pass through verbatim so clients see exactly what
        // the provider said.
        if let Self::Upstream { body, .. } = self {
            return (status, Json(Value::Object(body))).into_response();
        }

        let error_response = ErrorResponse {
            error: ErrorDetails {
                code: status.as_u16(),
                message: self.to_string(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_bad_request() {
        assert_eq!(
            GatewayError::InvalidRequest("bad json".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::ProviderNotFound("nope".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn upstream_errors_keep_their_status() {
        let error = GatewayError::Upstream {
            status: 429,
            body: Map::new(),
        };

        assert_eq!(error.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn connection_and_parse_errors_are_bad_gateway() {
        assert_eq!(
            GatewayError::Connection("refused".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::UpstreamParse("trailing garbage".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn plugin_errors_are_internal() {
        let error = GatewayError::plugin("zip", "boom");

        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        insta::assert_snapshot!(error.to_string(), @"Plugin 'zip' failed: boom");
    }
}
