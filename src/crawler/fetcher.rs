//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with the configured user agent and timeout
//! - Status-aware retry with exponential backoff
//! - The politeness delay after every request

use crate::config::FetchConfig;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Why a URL could not be fetched
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    /// A client error other than 429; never retried
    #[error("HTTP {status} from {url}")]
    Terminal { url: String, status: u16 },

    /// Every attempt hit a transient error
    #[error("Giving up on {url} after {attempts} attempts: {reason}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        reason: String,
    },
}

impl FetchFailure {
    pub fn url(&self) -> &str {
        match self {
            Self::Terminal { url, .. } | Self::RetriesExhausted { url, .. } => url,
        }
    }
}

/// Result of a single request
enum Attempt {
    Done(String),
    Terminal(u16),
    Retry(String),
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The fetch configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &FetchConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(config.timeout())
        .connect_timeout(config.timeout().min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Computes the wait before each retry: `unit * 2^attempt`
pub fn backoff_schedule(unit: Duration, max_retries: u32) -> Vec<Duration> {
    (0..max_retries)
        .map(|attempt| unit.saturating_mul(2u32.saturating_pow(attempt)))
        .collect()
}

/// Retrying page fetcher
///
/// # Retry Logic
///
/// | Condition | Action |
/// |-----------|--------|
/// | 2xx | Return the body |
/// | HTTP 429 | Retry after backoff |
/// | HTTP 5xx | Retry after backoff |
/// | Timeout / transport error | Retry after backoff |
/// | Other 4xx | Fail immediately |
///
/// The politeness delay is slept after every request, successful or not.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    backoff: Vec<Duration>,
    politeness_delay: Duration,
}

impl Fetcher {
    /// Creates a fetcher from configuration
    pub fn new(config: &FetchConfig) -> Result<Self, reqwest::Error> {
        let client = build_http_client(config)?;
        Ok(Self::with_client(
            client,
            config.backoff_unit(),
            config.max_retries,
            config.politeness_delay(),
        ))
    }

    /// Creates a fetcher around an existing client
    pub fn with_client(
        client: Client,
        backoff_unit: Duration,
        max_retries: u32,
        politeness_delay: Duration,
    ) -> Self {
        Self {
            client,
            backoff: backoff_schedule(backoff_unit, max_retries),
            politeness_delay,
        }
    }

    /// Waits between retries, in order
    pub fn backoff(&self) -> &[Duration] {
        &self.backoff
    }

    /// Fetches a URL, retrying transient failures
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to fetch
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - Response body of the first successful attempt
    /// * `Err(FetchFailure)` - Terminal status or exhausted retry budget
    pub async fn fetch(&self, url: &str) -> Result<String, FetchFailure> {
        let mut retries = 0usize;

        loop {
            let attempt = self.attempt(url).await;

            if !self.politeness_delay.is_zero() {
                tokio::time::sleep(self.politeness_delay).await;
            }

            let reason = match attempt {
                Attempt::Done(body) => return Ok(body),
                Attempt::Terminal(status) => {
                    tracing::debug!("HTTP {} for {}, not retrying", status, url);
                    return Err(FetchFailure::Terminal {
                        url: url.to_string(),
                        status,
                    });
                }
                Attempt::Retry(reason) => reason,
            };

            let Some(wait) = self.backoff.get(retries) else {
                return Err(FetchFailure::RetriesExhausted {
                    url: url.to_string(),
                    attempts: retries as u32 + 1,
                    reason,
                });
            };

            tracing::warn!(
                "{} for {}, retry {}/{} in {:?}",
                reason,
                url,
                retries + 1,
                self.backoff.len(),
                wait
            );
            tokio::time::sleep(*wait).await;
            retries += 1;
        }
    }

    async fn attempt(&self, url: &str) -> Attempt {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Attempt::Retry("Request timeout".to_string()),
            Err(e) => return Attempt::Retry(format!("Transport error: {}", e)),
        };

        let status = response.status();

        if status.is_success() {
            return match response.text().await {
                Ok(body) => Attempt::Done(body),
                Err(e) => Attempt::Retry(format!("Failed to read body: {}", e)),
            };
        }

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Attempt::Retry(format!("HTTP {}", status.as_u16()));
        }

        Attempt::Terminal(status.as_u16())
    }
}
