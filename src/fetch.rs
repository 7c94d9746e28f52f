//! Single-attempt HTTP fetch primitive
//!
//! The [`Fetcher`] trait is the orchestrator's only view of the network. An
//! implementation performs exactly one bounded-time GET and reports the result
//! as a [`FetchOutcome`] value; it never retries and never returns an error.

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::types::{FetchOutcome, duration_ms};
use async_trait::async_trait;

/// One bounded-time GET, failures as values
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url` once
    async fn fetch(&self, url: &str) -> FetchOutcome;

    /// Name for logs
    fn name(&self) -> &'static str;
}

/// reqwest-backed [`Fetcher`]
///
/// Connect and total timeouts come from [`ApiConfig`]; redirects follow
/// reqwest's default policy.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build the HTTP client
    ///
    /// Fails with [`Error::DependencyMissing`] when the client cannot be
    /// constructed (for example when no TLS backend can be initialized).
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.total_timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| Error::DependencyMissing(format!("failed to create HTTP client: {e}")))?;

        tracing::debug!(
            connect_timeout_ms = duration_ms(config.connect_timeout),
            total_timeout_ms = duration_ms(config.total_timeout),
            "HTTP fetcher initialized"
        );

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> FetchOutcome {
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return FetchOutcome::TransportError { message: describe_transport_error(&e) },
        };

        let status = response.status();
        if !status.is_success() {
            return FetchOutcome::HttpError {
                code: status.as_u16(),
            };
        }

        match response.bytes().await {
            Ok(body) => FetchOutcome::Success {
                body: body.to_vec(),
            },
            Err(e) => FetchOutcome::TransportError {
                message: format!("failed to read response body: {}", describe_transport_error(&e)),
            },
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {e}")
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        format!("request failed: {e}")
    }
}
