//! Token-bucket rate limiting.
//!
//! One bucket guards the outbound update stream to the cloud; the local
//! request surface keeps further buckets for its total and per-thing
//! request ceilings. Tokens refill continuously at the configured rate and
//! the bucket never holds more than its capacity.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Internal mutable state for the token bucket, protected by a Mutex.
#[derive(Debug)]
struct TokenBucketInner {
    /// Current number of available tokens (fractional for smooth refill).
    tokens: f64,
    /// Timestamp of the last refill calculation.
    last_refill: Instant,
}

/// Token bucket rate limiter.
///
/// Tokens are consumed on each request and refilled at a constant rate.
/// When no tokens are available, callers either fail fast
/// ([`try_acquire`](TokenBucket::try_acquire)) or wait for refill
/// ([`acquire`](TokenBucket::acquire)).
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum number of tokens in the bucket.
    capacity: u32,
    /// Rate at which tokens are added (tokens per second).
    refill_rate: f64,
    /// Mutable inner state (token count, last refill time).
    inner: Mutex<TokenBucketInner>,
}

impl TokenBucket {
    /// Creates a bucket that starts full.
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of tokens
    /// * `refill_rate` - Tokens added per second
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            inner: Mutex::new(TokenBucketInner {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Bucket sized for a per-second rate: capacity and refill both equal
    /// the rate, allowing short bursts up to one second's worth.
    pub fn per_second(rate: u32) -> Self {
        Self::new(rate.max(1), rate.max(1) as f64)
    }

    /// Refills the bucket based on elapsed time since the last refill,
    /// capping at capacity.
    fn refill(&self, inner: &mut TokenBucketInner) {
        let now = Instant::now();
        let elapsed_secs = now.duration_since(inner.last_refill).as_secs_f64();
        if elapsed_secs > 0.0 {
            inner.tokens = (inner.tokens + elapsed_secs * self.refill_rate)
                .min(self.capacity as f64);
            inner.last_refill = now;
        }
    }

    /// Attempts to take a single token; returns false without blocking
    /// when none is available.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        self.refill(&mut inner);
        if inner.tokens >= 1.0 {
            inner.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Estimated wait until a token becomes available; zero when one is
    /// already free.
    pub fn time_until_available(&self) -> Duration {
        let mut inner = self.inner.lock().unwrap();
        self.refill(&mut inner);
        if inner.tokens >= 1.0 {
            Duration::ZERO
        } else {
            let deficit = 1.0 - inner.tokens;
            if self.refill_rate > 0.0 {
                Duration::from_secs_f64(deficit / self.refill_rate)
            } else {
                Duration::MAX
            }
        }
    }

    /// Waits for a token, sleeping between attempts.
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }
            let wait = self
                .time_until_available()
                .max(Duration::from_millis(5));
            tokio::time::sleep(wait).await;
        }
    }

    /// Current number of available tokens (after refill).
    pub fn available_tokens(&self) -> f64 {
        let mut inner = self.inner.lock().unwrap();
        self.refill(&mut inner);
        inner.tokens
    }

    /// Maximum capacity of the bucket.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_starts_full() {
        let bucket = TokenBucket::new(3, 1.0);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn test_time_until_available_zero_when_free() {
        let bucket = TokenBucket::new(1, 1.0);
        assert_eq!(bucket.time_until_available(), Duration::ZERO);
    }

    #[test]
    fn test_time_until_available_positive_when_drained() {
        let bucket = TokenBucket::new(1, 10.0);
        assert!(bucket.try_acquire());
        let wait = bucket.time_until_available();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_millis(150));
    }

    #[test]
    fn test_refill_restores_tokens() {
        let bucket = TokenBucket::new(2, 1000.0);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());

        std::thread::sleep(Duration::from_millis(10));
        assert!(bucket.try_acquire());
    }

    #[test]
    fn test_per_second_shape() {
        let bucket = TokenBucket::per_second(100);
        assert_eq!(bucket.capacity(), 100);
        assert!(bucket.available_tokens() >= 99.0);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let bucket = TokenBucket::new(1, 200.0);
        bucket.acquire().await;
        // Second acquisition has to wait for refill but completes quickly.
        let start = Instant::now();
        bucket.acquire().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
