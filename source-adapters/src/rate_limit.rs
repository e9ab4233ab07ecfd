// Per-tenant rate limiting of spreadsheet provider calls.
//
// The provider allows roughly 100 requests per 100 seconds per user. Calls
// over budget fail locally with a 429 ProviderError instead of spending a
// request that would be rejected upstream.

use dashmap::DashMap;
use geosource::SourceError;
use std::time::{Duration, Instant};

/// Token bucket for a single tenant.
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u64) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill: Instant::now(),
        }
    }

    /// Try to consume one token. Refills at capacity/window tokens per second.
    fn try_consume(&mut self, capacity: u64, window: Duration) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        let refill_rate = capacity as f64 / window.as_secs_f64().max(f64::EPSILON);
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity as f64);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-tenant token bucket rate limiter.
///
/// Buckets are created lazily on first call. State is in-memory only.
pub struct ProviderRateLimiter {
    buckets: DashMap<String, TokenBucket>,
    capacity: u64,
    window: Duration,
}

impl ProviderRateLimiter {
    pub fn new(capacity: u64, window: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity,
            window,
        }
    }

    /// Consume one request from the tenant's budget.
    pub fn check(&self, tenant_id: &str) -> Result<(), SourceError> {
        let mut bucket = self
            .buckets
            .entry(tenant_id.to_string())
            .or_insert_with(|| TokenBucket::new(self.capacity));

        if bucket.try_consume(self.capacity, self.window) {
            Ok(())
        } else {
            tracing::warn!(tenant_id = %tenant_id, "Spreadsheet provider rate limit reached");
            Err(SourceError::provider(
                Some(429),
                "Too many spreadsheet requests; please retry shortly",
            ))
        }
    }
}

impl Default for ProviderRateLimiter {
    fn default() -> Self {
        Self::new(100, Duration::from_secs(100))
    }
}
