use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::models::chat::ChatMessage;

use super::{BackendError, ChatBackend};

pub type RetryPredicate = Arc<dyn Fn(&BackendError) -> bool + Send + Sync>;

/// Exponential backoff: the delay after attempt `i` is
/// `min(base_delay * 2^(i-1), max_delay)`, jittered by [0.8, 1.2].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * 2f64.powi(attempt.saturating_sub(1) as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jitter = rand::rng().random_range(0.8..=1.2);
        Duration::from_secs_f64(capped * jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(700), Duration::from_millis(4000))
    }
}

/// Re-sends failed calls up to `attempts` times in total. Every attempt goes
/// through the full wrapped chain, so a rate limiter underneath throttles
/// retries too. With no predicate every error is retried; a predicate that
/// rejects an error stops immediately with that error.
pub struct RetryingBackend<B> {
    inner: B,
    policy: RetryPolicy,
    retry_if: Option<RetryPredicate>,
}

impl<B> RetryingBackend<B> {
    pub fn new(inner: B, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            retry_if: None,
        }
    }

    pub fn with_predicate(mut self, retry_if: RetryPredicate) -> Self {
        self.retry_if = Some(retry_if);
        self
    }

    fn should_retry(&self, err: &BackendError) -> bool {
        match &self.retry_if {
            Some(predicate) => predicate(err),
            None => true,
        }
    }
}

#[async_trait]
impl<B: ChatBackend> ChatBackend for RetryingBackend<B> {
    async fn send(&self, messages: &[ChatMessage]) -> Result<String, BackendError> {
        let mut attempt = 1u32;
        loop {
            match self.inner.send(messages).await {
                Ok(reply) => return Ok(reply),
                Err(err) => {
                    if !self.should_retry(&err) || attempt >= self.policy.attempts {
                        return Err(err);
                    }
                    warn!(
                        "retry {}/{} after error: {}",
                        attempt, self.policy.attempts, err
                    );
                    sleep(self.policy.delay_after(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    struct ScriptedBackend {
        script: Mutex<VecDeque<Result<String, BackendError>>>,
        calls: AtomicU32,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<String, BackendError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn send(&self, _messages: &[ChatMessage]) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok("ok".to_string()))
        }
    }

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(10), Duration::from_millis(40))
    }

    #[tokio::test]
    async fn test_success_needs_one_attempt() {
        let inner = Arc::new(ScriptedBackend::new(vec![Ok("hi".to_string())]));
        let backend = RetryingBackend::new(inner.clone(), fast_policy(3));
        let reply = backend.send(&[]).await.unwrap();
        assert_eq!(reply, "hi");
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let inner = Arc::new(ScriptedBackend::new(vec![
            Err(BackendError::transient("first")),
            Err(BackendError::transient("second")),
            Ok("third time lucky".to_string()),
        ]));
        let backend = RetryingBackend::new(inner.clone(), fast_policy(3));
        let reply = backend.send(&[]).await.unwrap();
        assert_eq!(reply, "third time lucky");
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let inner = Arc::new(ScriptedBackend::new(vec![
            Err(BackendError::transient("one")),
            Err(BackendError::transient("two")),
            Err(BackendError::transient("three")),
        ]));
        let backend = RetryingBackend::new(inner.clone(), fast_policy(3));
        let err = backend.send(&[]).await.unwrap_err();
        assert_eq!(err.detail, "three");
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn test_predicate_rejects_fatal_errors_immediately() {
        let inner = Arc::new(ScriptedBackend::new(vec![Err(BackendError::fatal(
            "bad request",
        ))]));
        let backend = RetryingBackend::new(inner.clone(), fast_policy(5))
            .with_predicate(Arc::new(|err: &BackendError| err.transient));
        let err = backend.send(&[]).await.unwrap_err();
        assert_eq!(err.detail, "bad request");
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_predicate_retries_fatal_errors() {
        let inner = Arc::new(ScriptedBackend::new(vec![
            Err(BackendError::fatal("oops")),
            Ok("recovered".to_string()),
        ]));
        let backend = RetryingBackend::new(inner.clone(), fast_policy(3));
        assert_eq!(backend.send(&[]).await.unwrap(), "recovered");
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_exponentially() {
        let inner = Arc::new(ScriptedBackend::new(vec![
            Err(BackendError::transient("1")),
            Err(BackendError::transient("2")),
            Err(BackendError::transient("3")),
        ]));
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(10));
        let backend = RetryingBackend::new(inner, policy);

        let start = Instant::now();
        backend.send(&[]).await.unwrap_err();
        let elapsed = start.elapsed().as_secs_f64();
        // Two sleeps: ~1 s and ~2 s, each jittered by [0.8, 1.2].
        assert!(elapsed >= 2.4, "elapsed {elapsed}s");
        assert!(elapsed <= 3.6, "elapsed {elapsed}s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_capped_at_max_delay() {
        let inner = Arc::new(ScriptedBackend::new(vec![
            Err(BackendError::transient("1")),
            Err(BackendError::transient("2")),
            Err(BackendError::transient("3")),
            Err(BackendError::transient("4")),
        ]));
        let policy = RetryPolicy::new(4, Duration::from_secs(1), Duration::from_millis(1500));
        let backend = RetryingBackend::new(inner, policy);

        let start = Instant::now();
        backend.send(&[]).await.unwrap_err();
        let elapsed = start.elapsed().as_secs_f64();
        // Sleeps of ~1 s, ~1.5 s (capped), ~1.5 s (capped), jittered.
        assert!(elapsed >= 3.2, "elapsed {elapsed}s");
        assert!(elapsed <= 4.8, "elapsed {elapsed}s");
    }

    #[test]
    fn test_attempts_are_clamped_to_at_least_one() {
        let policy = RetryPolicy::new(0, Duration::from_millis(1), Duration::from_millis(1));
        assert_eq!(policy.attempts, 1);
    }
}
