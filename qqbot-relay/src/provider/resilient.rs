//! Retry wrapper for chat completions.
//!
//! Retries transient failures with exponential backoff. Client errors that
//! cannot succeed on retry (bad key, bad request) fail immediately.

use super::{ChatRequest, ChatResponse, Provider, ProviderError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Base backoff delay in milliseconds (doubles with each retry).
    pub base_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_backoff_ms: 500,
            max_backoff_ms: 10_000,
        }
    }
}

impl ResilienceConfig {
    /// Build from the service LLM settings.
    pub fn from_llm(llm: &qqbot_common::LlmConfig) -> Self {
        Self {
            max_retries: llm.max_retries,
            base_backoff_ms: llm.retry_backoff_ms,
            ..Self::default()
        }
    }
}

/// A provider that retries its inner provider with exponential backoff.
pub struct ResilientProvider {
    inner: Arc<dyn Provider>,
    config: ResilienceConfig,
}

impl ResilientProvider {
    pub fn new(inner: Arc<dyn Provider>, config: ResilienceConfig) -> Self {
        Self { inner, config }
    }

    /// Calculate backoff delay for a given attempt.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .config
            .base_backoff_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.config.max_backoff_ms);
        Duration::from_millis(delay_ms)
    }
}

/// 4xx other than 408/429 will not change on retry.
fn is_retryable(err: &ProviderError) -> bool {
    match err.status_code {
        Some(status) if (400..500).contains(&status) => status == 408 || status == 429,
        _ => true,
    }
}

#[async_trait]
impl Provider for ResilientProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let provider_name = self.inner.name();
        let mut attempt = 0;

        loop {
            match self.inner.chat(request.clone()).await {
                Ok(response) => {
                    if attempt > 0 {
                        tracing::info!(
                            provider = provider_name,
                            attempt = attempt + 1,
                            "Provider recovered after retries"
                        );
                    }
                    return Ok(response);
                }
                Err(e) if attempt < self.config.max_retries && is_retryable(&e) => {
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(
                        provider = provider_name,
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Provider call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(mut e) => {
                    if attempt > 0 {
                        e.message = format!("{} (after {} attempts)", e.message, attempt + 1);
                    }
                    return Err(e);
                }
            }
        }
    }
}
