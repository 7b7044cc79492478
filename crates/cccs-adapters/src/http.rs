// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared HTTP plumbing: client construction and error hygiene.

use cccs_error::{CccsError, ErrorKind};
use std::time::Duration;

/// Hard cap on connection establishment.
const CONNECT_TIMEOUT_CAP: Duration = Duration::from_secs(5);

/// How long idle pooled connections are kept alive.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest error detail retained after sanitization.
const MAX_ERROR_DETAIL: usize = 200;

/// Connection settings shared by every adapter.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Service base URL (scheme + authority, optional prefix).
    pub base_url: String,
    /// Read/write timeout for each request.
    pub timeout: Duration,
    /// API version path segment (`"v1"` unless negotiated otherwise).
    pub api_version: String,
}

impl HttpConfig {
    /// Config for `base_url` with a 5 s timeout and API version `v1`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(5),
            api_version: "v1".to_string(),
        }
    }

    /// Override the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn url(&self, segment: &str, endpoint: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            segment,
            self.api_version,
            endpoint
        )
    }
}

/// Build a bounded client for an adapter.
pub(crate) fn build_client(config: &HttpConfig) -> Result<reqwest::Client, CccsError> {
    reqwest::Client::builder()
        .connect_timeout(config.timeout.min(CONNECT_TIMEOUT_CAP))
        .timeout(config.timeout)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .build()
        .map_err(|e| {
            CccsError::new(ErrorKind::Unknown, "failed to construct HTTP client").with_source(e)
        })
}

/// Cap an upstream error string and mask obvious secret tokens before it
/// reaches logs or error messages.
pub(crate) fn sanitize_error_message(text: &str) -> String {
    let masked = text
        .replace("Bearer ", "Bearer [REDACTED] ")
        .replace("api_key=", "api_key=[REDACTED]");
    if masked.chars().count() <= MAX_ERROR_DETAIL {
        return masked;
    }
    let mut capped: String = masked.chars().take(MAX_ERROR_DETAIL).collect();
    capped.push_str("...");
    capped
}
