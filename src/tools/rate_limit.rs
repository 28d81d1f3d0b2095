//! Token bucket admission control.
//!
//! One bucket is shared by every tool invocation that reaches a downstream
//! dependency. Refill is computed lazily inside `acquire` from the time
//! elapsed since the previous refill, so an idle limiter owns no timers.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::server::metrics;

/// Rate limit configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum number of tokens the bucket holds
    pub capacity: u32,
    /// Time needed to refill an empty bucket
    pub period: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 30,
            period: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Creates a full bucket.
    ///
    /// Zero capacity or a zero period are rejected by config validation
    /// before a bucket is ever built; here they are clamped to the smallest
    /// usable values.
    pub fn new(config: RateLimitConfig) -> Self {
        let capacity = config.capacity.max(1) as f64;
        let period = config.period.max(Duration::from_millis(1));
        Self {
            capacity,
            refill_per_sec: capacity / period.as_secs_f64(),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    /// Waits until `n` tokens are available and debits them.
    ///
    /// Never fails. A request larger than the capacity is served in
    /// capacity-sized installments so the token count stays within
    /// `[0, capacity]`.
    pub async fn acquire(&self, n: u32) {
        let started = Instant::now();
        let mut remaining = n as f64;

        while remaining > 0.0 {
            let chunk = remaining.min(self.capacity);
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                if state.tokens >= chunk {
                    state.tokens -= chunk;
                    remaining -= chunk;
                    None
                } else {
                    let deficit = chunk - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
                }
            };

            if let Some(wait) = wait {
                debug!("Rate limited, waiting {:?} for {} tokens", wait, chunk);
                tokio::time::sleep(wait).await;
            }
        }

        metrics::record_rate_limit_wait(started.elapsed());
    }

    /// Tokens currently available, after refilling.
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }
}

impl Default for TokenBucket {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
