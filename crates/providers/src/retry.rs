//! Provider retry: bounded exponential backoff with full jitter.
//!
//! Wraps any provider. Transient failures (network, timeouts, 5xx, rate
//! limits) are retried up to `max_attempts` total attempts; everything else
//! is returned immediately.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use stockwise_core::error::ProviderError;
use stockwise_core::provider::{Provider, ProviderRequest, ProviderResponse};
use tracing::{info, warn};

/// Backoff schedule for transient model failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first (>= 1)
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    /// Sleep a uniformly random duration in `0..=delay` instead of `delay`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Build from the `[retry]` config section.
    pub fn from_config(config: &stockwise_config::RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff_factor: config.backoff_factor,
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }

    /// The un-jittered delay after the `retry`-th failure (1-based).
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exp = self.backoff_factor.powi(retry.saturating_sub(1) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * exp).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis.max(0.0) as u64)
    }

    /// The delay to actually sleep before the next attempt.
    fn delay_for(&self, retry: u32, error: &ProviderError) -> Duration {
        let mut delay = self.base_delay(retry);
        if let ProviderError::RateLimited { retry_after_secs } = error {
            delay = delay.max(Duration::from_secs(*retry_after_secs)).min(self.max_delay);
        }
        if self.jitter && !delay.is_zero() {
            let millis = rand::rng().random_range(0..=delay.as_millis() as u64);
            delay = Duration::from_millis(millis);
        }
        delay
    }
}

/// A provider that retries transient failures of an inner provider.
pub struct RetryingProvider {
    inner: Arc<dyn Provider>,
    policy: RetryPolicy,
    attempt_timeout: Option<Duration>,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            attempt_timeout: None,
        }
    }

    /// Bound every single attempt. An attempt that runs over counts as a
    /// transient timeout and is retried.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn attempt(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        match self.attempt_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.inner.complete(request))
                .await
                .unwrap_or_else(|_| {
                    Err(ProviderError::Timeout(format!(
                        "Provider '{}' timed out after {}ms",
                        self.inner.name(),
                        timeout.as_millis()
                    )))
                }),
            None => self.inner.complete(request).await,
        }
    }
}

#[async_trait]
impl Provider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match self.attempt(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if !error.is_transient() {
                return Err(error);
            }

            if attempt >= max_attempts {
                warn!(
                    provider = %self.inner.name(),
                    attempts = attempt,
                    error = %error,
                    "Retry: giving up"
                );
                if max_attempts == 1 {
                    return Err(error);
                }
                return Err(ProviderError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = self.policy.delay_for(attempt, &error);
            info!(
                provider = %self.inner.name(),
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retry: transient failure, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use stockwise_core::error::ProviderErrorKind;
    use stockwise_core::message::Message;
    use stockwise_core::provider::ModelOptions;

    /// Plays back a fixed list of results, then keeps succeeding.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<String, ProviderError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("ok".into()));
            next.map(|content| ProviderResponse {
                content,
                usage: None,
                model: request.model,
                metadata: serde_json::Map::new(),
            })
        }
    }

    /// A provider that hangs forever (for timeout testing).
    struct HangingProvider;

    #[async_trait]
    impl Provider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ProviderError::Network("unreachable".into()))
        }
    }

    fn test_request() -> ProviderRequest {
        ProviderRequest::new(&ModelOptions::new("test"), vec![Message::user("hello")])
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(100),
            jitter: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let inner = ScriptedProvider::new(vec![
            Err(ProviderError::Network("connection reset".into())),
            Err(ProviderError::ApiError { status_code: 503, message: "overloaded".into() }),
            Ok("Final Answer: done".into()),
        ]);
        let provider = RetryingProvider::new(inner.clone(), fast_policy(3));

        let response = provider.complete(test_request()).await.unwrap();
        assert_eq!(response.content, "Final Answer: done");
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_requests_are_not_retried() {
        let inner = ScriptedProvider::new(vec![Err(ProviderError::AuthenticationFailed(
            "bad key".into(),
        ))]);
        let provider = RetryingProvider::new(inner.clone(), fast_policy(5));

        let err = provider.complete(test_request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn local_inference_failures_are_not_retried() {
        let inner = ScriptedProvider::new(vec![Err(ProviderError::LocalInference("oom".into()))]);
        let provider = RetryingProvider::new(inner.clone(), fast_policy(3));

        let err = provider.complete(test_request()).await.unwrap_err();
        assert_eq!(err.kind(), ProviderErrorKind::LocalInference);
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded() {
        let inner = ScriptedProvider::new(vec![
            Err(ProviderError::RateLimited { retry_after_secs: 0 }),
            Err(ProviderError::RateLimited { retry_after_secs: 0 }),
            Err(ProviderError::RateLimited { retry_after_secs: 0 }),
            Ok("never reached".into()),
        ]);
        let provider = RetryingProvider::new(inner.clone(), fast_policy(3));

        let err = provider.complete(test_request()).await.unwrap_err();
        match err {
            ProviderError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, ProviderError::RateLimited { .. }));
            }
            other => panic!("Expected RetriesExhausted, got: {other:?}"),
        }
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_policy_returns_raw_error() {
        let inner = ScriptedProvider::new(vec![Err(ProviderError::Network("down".into()))]);
        let provider = RetryingProvider::new(inner.clone(), RetryPolicy::none());

        let err = provider.complete(test_request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_timeout_counts_as_transient() {
        let provider = RetryingProvider::new(Arc::new(HangingProvider), fast_policy(2))
            .with_attempt_timeout(Duration::from_millis(50));

        let err = provider.complete(test_request()).await.unwrap_err();
        match err {
            ProviderError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, ProviderError::Timeout(_)));
            }
            other => panic!("Expected RetriesExhausted, got: {other:?}"),
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = fast_policy(10);
        assert_eq!(policy.base_delay(1), Duration::from_millis(10));
        assert_eq!(policy.base_delay(2), Duration::from_millis(20));
        assert_eq!(policy.base_delay(3), Duration::from_millis(40));
        assert_eq!(policy.base_delay(8), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter: true,
            ..fast_policy(5)
        };
        let err = ProviderError::Network("x".into());
        for _ in 0..50 {
            assert!(policy.delay_for(3, &err) <= Duration::from_millis(40));
        }
    }

    #[test]
    fn rate_limit_hint_is_respected_up_to_cap() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(10),
            ..fast_policy(5)
        };
        let err = ProviderError::RateLimited { retry_after_secs: 3 };
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(3));
        let err = ProviderError::RateLimited { retry_after_secs: 30 };
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(10));
    }

    #[test]
    fn policy_from_config() {
        let policy = RetryPolicy::from_config(&stockwise_config::RetryConfig::default());
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert!(policy.jitter);
    }
}
