//! Remote range fetch
//!
//! The streaming API serves continuous channel data as a JSON array of
//! `[timestamp_usec, value]` pairs for a `[start, end)` window. Pairs are
//! not guaranteed to arrive in timestamp order.

use crate::config::ApiConfig;
use crate::timeseries::channel::Channel;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

const CONTINUOUS_ENDPOINT: &str = "/streaming/ts/retrieve/continuous";

/// Source of raw channel samples
#[async_trait]
pub trait RangeSource: Send + Sync {
    /// Samples of `channel` with `start <= ts < end`, in any order
    async fn fetch_range(
        &self,
        channel: &Channel,
        start: i64,
        end: i64,
    ) -> Result<Vec<(i64, f64)>, RemoteError>;
}

/// HTTP client for the streaming API
pub struct HttpRangeSource {
    client: Client,
    config: ApiConfig,
}

impl HttpRangeSource {
    pub fn new(config: ApiConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.max_request_time_secs))
            .build()
            .map_err(RemoteError::Request)?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    fn url(&self) -> String {
        format!(
            "{}{}",
            self.config.api_host.trim_end_matches('/'),
            CONTINUOUS_ENDPOINT
        )
    }

    fn query(&self, channel: &Channel, start: i64, end: i64) -> Vec<(&'static str, String)> {
        vec![
            ("channel", channel.id.clone()),
            // required by the API even when unlimited
            ("limit", String::new()),
            (
                "session",
                self.config.session_token.clone().unwrap_or_default(),
            ),
            ("start", start.to_string()),
            ("end", end.to_string()),
        ]
    }

    async fn send_get(
        &self,
        channel: &Channel,
        start: i64,
        end: i64,
    ) -> Result<Vec<(i64, f64)>, RemoteError> {
        let url = self.url();
        let query = self.query(channel, start, end);
        let mut last_error = RemoteError::Unavailable;

        for attempt in 0..=self.config.max_request_timeout_retries {
            if attempt > 0 {
                // Backoff: 1s, 4s, 9s...
                let delay = Duration::from_secs((attempt as u64).pow(2));
                tracing::debug!("Retrying {} in {:?} ({})", url, delay, last_error);
                tokio::time::sleep(delay).await;
            }

            let response = match self.client.get(&url).query(&query).send().await {
                Ok(response) => response,
                Err(e) => {
                    last_error = classify(e);
                    if last_error.is_retryable() {
                        continue;
                    }
                    return Err(last_error);
                }
            };

            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(RemoteError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let body = response.bytes().await.map_err(classify)?;
            return decode_pairs(&body);
        }

        Err(last_error)
    }
}

#[async_trait]
impl RangeSource for HttpRangeSource {
    async fn fetch_range(
        &self,
        channel: &Channel,
        start: i64,
        end: i64,
    ) -> Result<Vec<(i64, f64)>, RemoteError> {
        tracing::debug!("Fetching {} [{}, {})", channel.id, start, end);
        self.send_get(channel, start, end).await
    }
}

/// Parse a `[[timestamp, value], ...]` response body
fn decode_pairs(body: &[u8]) -> Result<Vec<(i64, f64)>, RemoteError> {
    serde_json::from_slice(body).map_err(|e| RemoteError::Decode(e.to_string()))
}

fn classify(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout
    } else if e.is_connect() {
        RemoteError::Unavailable
    } else {
        RemoteError::Request(e)
    }
}

/// Errors from the streaming API
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Request timed out")]
    Timeout,

    #[error("Streaming API unavailable")]
    Unavailable,

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Could not decode response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Timeout | RemoteError::Unavailable)
    }
}
