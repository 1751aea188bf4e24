//! Per-identity event rate limiting.
//!
//! Events arrive over established WebSocket connections, so limiting is
//! keyed by verified identity rather than peer address.  Events over the
//! budget are dropped; the connection stays up.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use parley_shared::UserId;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self, rate: f64, capacity: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;

        self.tokens = (self.tokens + elapsed * rate).min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Clone)]
pub struct EventRateLimiter {
    buckets: Arc<Mutex<HashMap<UserId, TokenBucket>>>,
    rate: f64,
    capacity: f64,
}

impl EventRateLimiter {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate,
            capacity,
        }
    }

    /// Whether this identity may process one more event right now.
    pub async fn check(&self, user: UserId) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(user)
            .or_insert_with(|| TokenBucket::new(self.capacity));
        bucket.try_consume(self.rate, self.capacity)
    }

    /// Evict buckets idle longer than `max_idle_secs`.
    pub async fn purge_stale(&self, max_idle_secs: f64) {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        buckets.retain(|_, bucket| {
            now.duration_since(bucket.last_refill).as_secs_f64() < max_idle_secs
        });
    }
}

impl Default for EventRateLimiter {
    fn default() -> Self {
        // Generous enough for typing indicators and candidate bursts.
        Self::new(20.0, 60.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limiter_allows_burst() {
        let limiter = EventRateLimiter::new(10.0, 5.0);
        let user = UserId::new();

        for _ in 0..5 {
            assert!(limiter.check(user).await);
        }

        assert!(!limiter.check(user).await);
    }

    #[tokio::test]
    async fn test_limiter_isolates_identities() {
        let limiter = EventRateLimiter::new(10.0, 2.0);
        let (a, b) = (UserId::new(), UserId::new());

        assert!(limiter.check(a).await);
        assert!(limiter.check(a).await);
        assert!(!limiter.check(a).await);

        assert!(limiter.check(b).await);
    }

    #[tokio::test]
    async fn test_purge_stale() {
        let limiter = EventRateLimiter::new(10.0, 5.0);
        let user = UserId::new();
        assert!(limiter.check(user).await);

        limiter.purge_stale(0.0).await;

        let buckets = limiter.buckets.lock().await;
        assert!(buckets.is_empty());
    }
}
