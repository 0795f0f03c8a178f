//! Live-timing HTTP client
//!
//! One GET per call, no internal retries. A failed or timed-out fetch is
//! surfaced to the collector loop, which waits for the next tick.

use std::time::Duration;
use thiserror::Error;

/// Live-timing client errors
#[derive(Debug, Error)]
pub enum TimingError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Upstream returned status {0}")]
    Status(u16),
}

/// Client for the upstream live-timing endpoint
pub struct TimingClient {
    http_client: reqwest::Client,
    url: String,
}

impl TimingClient {
    pub fn new(url: String, timeout: Duration) -> Result<Self, TimingError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TimingError::Network(e.to_string()))?;

        Ok(Self { http_client, url })
    }

    /// Fetch the current live-timing screen as raw bytes.
    pub async fn fetch(&self) -> Result<Vec<u8>, TimingError> {
        tracing::debug!(url = %self.url, "Fetching live-timing data");

        let response = self
            .http_client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| TimingError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TimingError::Status(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TimingError::Network(e.to_string()))?;

        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_creation() {
        let client = TimingClient::new(
            "https://example.com/livescreen".to_string(),
            Duration::from_secs(10),
        );
        assert!(client.is_ok());
    }
}
