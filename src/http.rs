//! JSON-over-HTTP calls to embedding and generation backends.
//!
//! Every remote provider goes through [`JsonClient::post`], which applies
//! the same retry strategy:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Failures are reported as [`CapabilityError`], classified as transient
//! or fatal so callers can decide whether to degrade.

use std::time::Duration;

use serde_json::Value;

use crate::error::CapabilityError;

/// A reqwest client bound to one provider name and retry budget.
#[derive(Debug, Clone)]
pub struct JsonClient {
    provider: &'static str,
    client: reqwest::Client,
    max_retries: u32,
}

impl JsonClient {
    pub fn new(
        provider: &'static str,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Result<Self, CapabilityError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| CapabilityError::fatal(provider, format!("http client: {}", e)))?;
        Ok(Self {
            provider,
            client,
            max_retries,
        })
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    /// POST `body` to `url` and return the parsed JSON response.
    pub async fn post(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &Value,
    ) -> Result<Value, CapabilityError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = backoff(attempt);
                tracing::debug!(
                    provider = self.provider,
                    attempt,
                    delay_secs = delay.as_secs(),
                    "retrying request"
                );
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .json(body);
            for (name, value) in headers {
                request = request.header(*name, value);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json::<Value>().await.map_err(|e| {
                            CapabilityError::fatal(
                                self.provider,
                                format!("invalid response body: {}", e),
                            )
                        });
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(CapabilityError::transient(
                            self.provider,
                            format!("API error {}: {}", status, body_text),
                        ));
                        continue;
                    }

                    return Err(CapabilityError::fatal(
                        self.provider,
                        format!("API error {}: {}", status, body_text),
                    ));
                }
                Err(e) if e.is_timeout() => {
                    last_err = Some(CapabilityError::transient(
                        self.provider,
                        format!("request timed out: {}", e),
                    ));
                }
                Err(e) => {
                    last_err = Some(CapabilityError::transient(
                        self.provider,
                        format!("connection error ({}): {}", url, e),
                    ));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            CapabilityError::transient(self.provider, "request failed after retries")
        }))
    }
}

/// Delay before retry `attempt` (1-based).
pub(crate) fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}

/// Read an environment variable holding an API key.
pub(crate) fn api_key(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let secs: Vec<u64> = (1..=8).map(|a| backoff(a).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 32, 32, 32]);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        let client = JsonClient::new("test", 1, 0).unwrap();
        let err = client
            .post("http://127.0.0.1:9/unreachable", &[], &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.is_transient(), "{:?}", err);
    }
}
