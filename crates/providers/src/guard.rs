//! Collaborator guards: per-call timeout plus bounded retry with
//! exponential backoff.
//!
//! Only transient failures (rate limit, network, timeout) are retried.
//! Everything else is returned on the first attempt.

use async_trait::async_trait;
use memtier_core::embedding::EmbeddingProvider;
use memtier_core::error::{EmbeddingError, ProviderError};
use memtier_core::provider::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Timeout and retry settings for one collaborator.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub timeout: Duration,
    /// Attempts after the first one
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each following one
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(timeout: Duration, max_retries: u32, backoff: Duration) -> Self {
        Self {
            timeout,
            max_retries,
            backoff,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(120), 2, Duration::from_millis(500))
    }
}

/// A chat provider wrapped with a timeout and retry.
pub struct GuardedChat {
    inner: Arc<dyn ChatProvider>,
    policy: RetryPolicy,
}

impl GuardedChat {
    pub fn new(inner: Arc<dyn ChatProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ChatProvider for GuardedChat {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let provider_name = self.inner.name().to_string();
        let mut attempt = 0;

        loop {
            let call = self.inner.complete(request.clone());
            let error = match tokio::time::timeout(self.policy.timeout, call).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout(format!(
                    "Provider '{}' timed out after {}s",
                    provider_name,
                    self.policy.timeout.as_secs()
                )),
            };

            if !error.is_transient() || attempt >= self.policy.max_retries {
                return Err(error);
            }

            let mut delay = self.policy.delay(attempt);
            if let ProviderError::RateLimited { retry_after_secs } = &error {
                delay = delay.max(Duration::from_secs(*retry_after_secs));
            }
            warn!(
                provider = %provider_name,
                attempt = attempt + 1,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "Chat call failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
            info!(provider = %provider_name, attempt = attempt + 1, "Retrying chat call");
        }
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}

/// An embedding provider wrapped with a timeout and retry.
pub struct GuardedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
}

impl GuardedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl EmbeddingProvider for GuardedEmbedder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut attempt = 0;

        loop {
            let call = self.inner.embed(text);
            let error = match tokio::time::timeout(self.policy.timeout, call).await {
                Ok(Ok(vector)) => return Ok(vector),
                Ok(Err(e)) => e,
                Err(_) => EmbeddingError::Timeout(self.policy.timeout.as_secs()),
            };

            if !error.is_transient() || attempt >= self.policy.max_retries {
                return Err(error);
            }

            let mut delay = self.policy.delay(attempt);
            if let EmbeddingError::Provider(ProviderError::RateLimited { retry_after_secs }) =
                &error
            {
                delay = delay.max(Duration::from_secs(*retry_after_secs));
            }
            warn!(
                provider = %self.inner.name(),
                attempt = attempt + 1,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "Embedding call failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
