//! Token-bucket admission control for outbound API calls.
//!
//! Refill is computed from elapsed time since the last refill rather than a
//! timer tick, so an idle client can burst up to capacity. The bucket sits
//! behind a `tokio::sync::Mutex`, whose waiters are served FIFO; a caller
//! that must wait sleeps while holding the lock, so later callers queue
//! behind it instead of overtaking.

use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

/// Sustained rate of the remote document API, requests per second.
pub const DEFAULT_RATE_PER_SEC: f64 = 3.0;
/// Burst capacity of the remote document API.
pub const DEFAULT_BURST: u32 = 10;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a full bucket. Non-positive arguments fall back to the defaults.
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        let rate = if rate_per_sec > 0.0 {
            rate_per_sec
        } else {
            DEFAULT_RATE_PER_SEC
        };
        let burst = f64::from(if burst > 0 { burst } else { DEFAULT_BURST });
        Self {
            rate,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Wait for one token. Returns how long the caller waited.
    ///
    /// ```rust
    /// use edgequake_enex2notion::RateLimiter;
    /// # tokio_test::block_on(async {
    /// let limiter = RateLimiter::new(3.0, 10);
    /// assert!(limiter.acquire().await.as_millis() < 100);
    /// # });
    /// ```
    pub async fn acquire(&self) -> Duration {
        let started = Instant::now();
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);

        if bucket.tokens < 1.0 {
            let wait = Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate);
            debug!("Rate limit: waiting {}ms for a token", wait.as_millis());
            sleep(wait).await;
            self.refill(&mut bucket);
            bucket.tokens = bucket.tokens.max(1.0);
        }

        bucket.tokens -= 1.0;
        started.elapsed()
    }

    /// Tokens currently available (after refill).
    pub async fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        bucket.tokens
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.last_refill = now;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_PER_SEC, DEFAULT_BURST)
    }
}
