// SPDX-License-Identifier: GPL-3.0-or-later

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

/// Token bucket rate limiter for provider calls.
///
/// The bucket holds up to `capacity` tokens and refills continuously at
/// `capacity` tokens per `window`. Each request consumes one token; callers
/// wait when the bucket is empty.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    capacity: f64,
    window: Duration,
    state: Arc<Mutex<BucketState>>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a limiter allowing `capacity` requests per `window`.
    ///
    /// # Arguments
    /// * `capacity` - Burst size and number of requests per window (minimum 1).
    /// * `window` - Time over which a full bucket refills.
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            window,
            state: Arc::new(Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            })),
        }
    }

    pub fn per_minute(requests: u32) -> Self {
        Self::new(requests, Duration::from_secs(60))
    }

    pub fn per_second(requests: u32) -> Self {
        Self::new(requests, Duration::from_secs(1))
    }

    /// Wait until a token is available and consume it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }

                let deficit = 1.0 - state.tokens;
                Duration::from_secs_f64(deficit * self.window.as_secs_f64() / self.capacity)
            };

            tracing::trace!(
                target: "providers",
                "rate limiting: waiting {:?}",
                wait
            );
            sleep(wait).await;
        }
    }

    /// Tokens currently available, after refilling.
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            let added = elapsed * self.capacity / self.window.as_secs_f64();
            state.tokens = (state.tokens + added).min(self.capacity);
            state.last_refill = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_up_to_capacity_is_immediate() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }

        assert!(start.elapsed() < Duration::from_millis(50));
        assert!(limiter.available().await < 1.0);
    }

    #[tokio::test]
    async fn test_empty_bucket_waits_for_refill() {
        // 2 tokens per 200ms -> one token every 100ms
        let limiter = RateLimiter::new(2, Duration::from_millis(200));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(90),
            "expected >= 90ms, got {:?}",
            elapsed
        );
        assert!(elapsed < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_tokens_never_exceed_capacity() {
        let limiter = RateLimiter::new(2, Duration::from_millis(20));
        sleep(Duration::from_millis(60)).await;
        assert!(limiter.available().await <= 2.0);
    }
}
