// Token Bucket Rate Limiter
//
// Dedicated to program-account scans. Capacity equals the per-second budget
// and the bucket snaps back to full once a second has passed since the last
// refill (full reset, not a leaky top-up). Waiters poll in small increments
// until a token frees up; nothing is ever rejected.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

const REFILL_PERIOD: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

pub struct TokenBucket {
    capacity: u32,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(per_second: u32) -> Self {
        let capacity = per_second.max(1);
        Self {
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Take a token if one is available right now
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        if now.duration_since(state.last_refill) >= REFILL_PERIOD {
            state.tokens = self.capacity;
            state.last_refill = now;
        }
        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Wait until a token is available and consume it
    pub async fn acquire(&self) {
        let mut waited = false;
        while !self.try_acquire() {
            if !waited {
                debug!("Scan rate limit reached ({} rps), waiting for refill", self.capacity);
                waited = true;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn run<F, Fut, T>(&self, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.acquire().await;
        operation().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_up_to_capacity_is_immediate() {
        let bucket = TokenBucket::new(3);
        let start = Instant::now();
        for _ in 0..3 {
            bucket.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(5));
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_excess_calls_wait_for_next_refill() {
        let bucket = TokenBucket::new(3);
        let start = Instant::now();
        let mut admitted_at = Vec::new();
        for _ in 0..5 {
            let elapsed = bucket.run(|| async { start.elapsed() }).await;
            admitted_at.push(elapsed);
        }

        assert_eq!(admitted_at.len(), 5);
        assert!(admitted_at[2] < Duration::from_millis(5));
        assert!(admitted_at[3] >= REFILL_PERIOD);
        assert!(admitted_at[4] >= REFILL_PERIOD);
        assert!(admitted_at[4] < REFILL_PERIOD + Duration::from_millis(50));
    }

    #[test]
    fn test_zero_rate_is_clamped_to_one() {
        let bucket = TokenBucket::new(0);
        assert_eq!(bucket.capacity(), 1);
    }
}
