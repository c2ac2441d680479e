//! HTTP server configuration settings.

use std::net::SocketAddr;

use serde::Deserialize;

/// HTTP server configuration settings.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server should listen on.
    pub listen_address: Option<SocketAddr>,
    /// Path of the health endpoint.
    pub health_path: Option<String>,
}

impl ServerConfig {
    /// The address to bind, falling back to the default port on all interfaces.
    pub fn listen_address_or_default(&self) -> SocketAddr {
        self.listen_address
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)))
    }

    /// Health endpoint path, `/health` unless overridden.
    pub fn health_path_or_default(&self) -> &str {
        self.health_path.as_deref().unwrap_or("/health")
    }
}
