use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::models::chat::ChatMessage;
use crate::utils::error::InvalidConfig;

use super::{BackendError, ChatBackend};

const MIN_WAIT: Duration = Duration::from_millis(10);

/// Token bucket that delays callers instead of rejecting them. Tokens refill
/// continuously at `rate` per second up to `capacity`.
pub struct TokenBucket {
    capacity: f64,
    rate: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: usize, rate_per_sec: f64) -> Result<Self, InvalidConfig> {
        if !rate_per_sec.is_finite() || rate_per_sec <= 0.0 {
            return Err(InvalidConfig(format!(
                "rate limiter refill rate must be > 0, got {rate_per_sec}"
            )));
        }
        if capacity < 1 {
            return Err(InvalidConfig(
                "rate limiter capacity must be >= 1".to_string(),
            ));
        }
        Ok(Self {
            capacity: capacity as f64,
            rate: rate_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        })
    }

    /// Waits until a token is available, then consumes it. Never fails.
    /// The sleep happens outside the lock; the wait is jittered so waiters
    /// do not wake in lockstep.
    pub async fn acquire(&self) {
        loop {
            let need = {
                let mut state = self.state.lock();
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.last_refill = now;
                state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                (1.0 - state.tokens) / self.rate
            };
            let jitter = rand::rng().random_range(0.9..=1.1);
            let wait = need.max(MIN_WAIT.as_secs_f64()) * jitter;
            sleep(Duration::from_secs_f64(wait)).await;
        }
    }

    /// Tokens currently available, refreshed to now.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.last_refill = now;
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.tokens
    }
}

/// Throttles every call to the wrapped backend through a [`TokenBucket`].
pub struct RateLimitedBackend<B> {
    inner: B,
    bucket: TokenBucket,
}

impl<B> RateLimitedBackend<B> {
    pub fn new(inner: B, burst: usize, rate_per_sec: f64) -> Result<Self, InvalidConfig> {
        Ok(Self {
            inner,
            bucket: TokenBucket::new(burst, rate_per_sec)?,
        })
    }

    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }
}

#[async_trait]
impl<B: ChatBackend> ChatBackend for RateLimitedBackend<B> {
    async fn send(&self, messages: &[ChatMessage]) -> Result<String, BackendError> {
        self.bucket.acquire().await;
        self.inner.send(messages).await
    }
}
