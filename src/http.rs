//! Outbound HTTP policy shared by the marketplace, mail, LLM and store clients.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};

use crate::backoff::BackoffConfig;

/// Timeout and retry settings for outbound HTTP calls.
#[derive(Debug, Clone)]
pub struct HttpPolicy {
    /// Per-request timeout
    pub timeout: Duration,
    /// Retries after the first attempt
    pub retries: u32,
    /// Delay between attempts
    pub backoff: BackoffConfig,
}

impl Default for HttpPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 1,
            backoff: BackoffConfig {
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(10),
                multiplier: 2.0,
            },
        }
    }
}

impl HttpPolicy {
    /// Build a client that enforces the request timeout.
    pub fn client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(concat!("workmate/", env!("CARGO_PKG_VERSION")))
            .timeout(self.timeout)
            .build()
    }

    /// Send a request, retrying transport errors, 429 and 5xx responses.
    ///
    /// `build` is called once per attempt. The last response is returned as-is
    /// once retries are exhausted so callers can report its status.
    pub async fn send_with_retry<F>(&self, build: F) -> reqwest::Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let result = build().send().await;
            let retryable = match &result {
                Ok(response) => is_retryable_status(response.status()),
                Err(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            };

            if !retryable || attempt >= self.retries {
                return result;
            }

            attempt += 1;
            let delay = self.backoff.cooldown_for(attempt);
            match &result {
                Ok(response) => tracing::warn!(
                    "HTTP {} from upstream, retrying in {:?} (attempt {}/{})",
                    response.status(),
                    delay,
                    attempt,
                    self.retries
                ),
                Err(e) => tracing::warn!(
                    "HTTP request failed: {}, retrying in {:?} (attempt {}/{})",
                    e,
                    delay,
                    attempt,
                    self.retries
                ),
            }
            tokio::time::sleep(delay).await;
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
