//! Token-bucket rate gate.
//!
//! One bucket per [`Mux`](crate::Mux), shared by every request it serves.
//! The decision is immediate: a request either takes a token or is rejected
//! with the too-many-requests envelope. Nothing waits or queues.

use std::time::Instant;

use parking_lot::Mutex;

/// Default bucket capacity.
pub const MAX_BURST_SIZE: u32 = 100;

/// Default refill rate, tokens per second.
pub const REFILL_PER_SECOND: f64 = 1.0;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

/// A token bucket starting full at `burst` tokens.
#[derive(Debug)]
pub struct RateGate {
    burst: f64,
    per_second: f64,
    bucket: Mutex<Bucket>,
}

impl RateGate {
    pub fn new(burst: u32, per_second: f64) -> Self {
        let burst = f64::from(burst);
        Self {
            burst,
            per_second: per_second.max(0.0),
            bucket: Mutex::new(Bucket { tokens: burst, last: Instant::now() }),
        }
    }

    /// Take one token if available.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    /// [`allow`](Self::allow) against an explicit clock reading.
    pub fn allow_at(&self, now: Instant) -> bool {
        let mut bucket = self.bucket.lock();

        // Readings older than the last refill add nothing.
        if now > bucket.last {
            let elapsed = now.duration_since(bucket.last).as_secs_f64();
            bucket.tokens = (bucket.tokens + elapsed * self.per_second).min(self.burst);
            bucket.last = now;
        }

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

impl Default for RateGate {
    fn default() -> Self {
        Self::new(MAX_BURST_SIZE, REFILL_PER_SECOND)
    }
}
