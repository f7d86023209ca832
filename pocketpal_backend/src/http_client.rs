use std::time::Duration;

use anyhow::{Context, Result};

/// Shared reqwest client. System proxy discovery is opt-in via
/// `POCKETPAL_ENABLE_SYSTEM_PROXY`; without it proxies are bypassed.
pub fn build_http_client(connect_timeout: Option<Duration>) -> Result<reqwest::Client> {
    let allow_system_proxy = std::env::var("POCKETPAL_ENABLE_SYSTEM_PROXY")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if allow_system_proxy {
        match attempt_build(connect_timeout, false) {
            Ok(client) => return Ok(client),
            Err(error) => tracing::warn!(
                "HTTP client initialization with system proxy discovery failed ({}); retrying with no_proxy",
                error
            ),
        }
    }

    attempt_build(connect_timeout, true).context("Failed to initialize HTTP client")
}

fn attempt_build(
    connect_timeout: Option<Duration>,
    no_proxy: bool,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder();
    // Only the connect phase is bounded; a streamed reply may legitimately run long.
    if let Some(timeout) = connect_timeout {
        builder = builder.connect_timeout(timeout);
    }
    if no_proxy {
        builder = builder.no_proxy();
    }
    builder.build()
}
