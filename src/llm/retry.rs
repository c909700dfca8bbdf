//! Bounded retries with exponential backoff for external calls.
//!
//! Every attempt runs under its own timeout so a hung dependency costs at most
//! `max_attempts * call_timeout` plus backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::error::{FetchError, LlmError};
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};

/// Retry/backoff settings for one class of external call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each time.
    pub base_delay: Duration,
    /// Upper bound for a single backoff delay.
    pub max_delay: Duration,
    /// Timeout applied to each individual attempt.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1` (attempt is 1-based), with up to 25% jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_delay);
        let jitter_ms = (capped.as_millis() as u64) / 4;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        capped + Duration::from_millis(jitter)
    }
}

/// Errors that know whether another attempt makes sense.
pub trait Retryable: Sized {
    fn should_retry(&self) -> bool;
    fn timed_out(label: &str, after: Duration) -> Self;
}

impl Retryable for LlmError {
    fn should_retry(&self) -> bool {
        self.is_retryable()
    }

    fn timed_out(label: &str, after: Duration) -> Self {
        LlmError::Timeout {
            provider: label.to_string(),
            after,
        }
    }
}

impl Retryable for FetchError {
    fn should_retry(&self) -> bool {
        self.is_retryable()
    }

    fn timed_out(label: &str, after: Duration) -> Self {
        FetchError::Timeout {
            source_name: label.to_string(),
            after,
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(policy.call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(label, policy.call_timeout)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && e.should_retry() => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    call = label,
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "External call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Provider wrapper that applies a `RetryPolicy` to every completion.
pub struct RetryingProvider {
    inner: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LlmProvider for RetryingProvider {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let label = self.inner.model_name().to_string();
        with_retry(&self.policy, &label, || self.inner.complete(request.clone())).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::llm::provider::{ChatMessage, FinishReason};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            call_timeout: Duration::from_millis(200),
        }
    }

    /// Fails with a retryable error until `succeed_on` attempts have been made.
    struct FlakyLlm {
        calls: AtomicU32,
        succeed_on: u32,
        permanent: bool,
    }

    #[async_trait]
    impl LlmProvider for FlakyLlm {
        fn model_name(&self) -> &str {
            "flaky"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.permanent {
                return Err(LlmError::AuthFailed {
                    provider: "flaky".into(),
                });
            }
            if n < self.succeed_on {
                return Err(LlmError::RequestFailed {
                    provider: "flaky".into(),
                    reason: "connection reset".into(),
                });
            }
            Ok(CompletionResponse {
                content: "ok".into(),
                input_tokens: 1,
                output_tokens: 1,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let flaky = Arc::new(FlakyLlm {
            calls: AtomicU32::new(0),
            succeed_on: 3,
            permanent: false,
        });
        let provider = RetryingProvider::new(flaky.clone(), fast_policy());
        let response = provider
            .complete(CompletionRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let flaky = Arc::new(FlakyLlm {
            calls: AtomicU32::new(0),
            succeed_on: 1,
            permanent: true,
        });
        let provider = RetryingProvider::new(flaky.clone(), fast_policy());
        let result = provider
            .complete(CompletionRequest::new(vec![ChatMessage::user("hi")]))
            .await;
        assert!(matches!(result, Err(LlmError::AuthFailed { .. })));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hung_call_times_out() {
        let policy = RetryPolicy {
            max_attempts: 2,
            call_timeout: Duration::from_millis(10),
            ..fast_policy()
        };
        let result: Result<(), LlmError> = with_retry(&policy, "slow", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(LlmError::Timeout { .. })));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            ..RetryPolicy::default()
        };
        assert!(policy.backoff(1) >= Duration::from_millis(100));
        // 100 * 2^9 would be huge; cap plus 25% jitter bounds it.
        assert!(policy.backoff(10) <= Duration::from_millis(375));
    }
}
