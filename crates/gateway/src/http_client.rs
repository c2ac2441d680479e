//! Shared reqwest client for upstream calls.

use std::{sync::LazyLock, time::Duration};

use reqwest::Client;

/// One pooled client shared by the driver, the model listing and the
/// analytics sink.
pub(crate) fn upstream_client() -> Client {
    static CLIENT: LazyLock<Client> = LazyLock::new(build_client);

    CLIENT.clone()
}

/// Completions can legitimately stream for minutes, so the overall timeout is
/// generous while the connect timeout stays tight. Idle pooled connections
/// are dropped after 30 seconds so provider-side DNS changes are picked up
/// between requests.
fn build_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(300))
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .expect("reqwest client construction only fails on TLS backend misconfiguration")
}
