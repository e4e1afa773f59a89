use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Semaphore;

/// Maximum number of tokens the global reservoir holds at once.
const GLOBAL_BURST_CAP: u32 = 5;

/// Global admission limiter: a token reservoir of capacity
/// `min(5, rpm)`, filled at startup and refilled by a single background
/// task every `60s / rpm`. Refills that would exceed the burst capacity
/// are dropped.
///
/// Admission awaits a token; dropping the waiting future (client
/// disconnect) releases nothing and leaves the reservoir untouched.
pub struct GlobalLimiter {
    permits: Arc<Semaphore>,
    refill_task: tokio::task::JoinHandle<()>,
}

impl GlobalLimiter {
    /// Build the limiter and spawn its refill task. Returns `None` when
    /// `rpm` is zero (unlimited).
    #[must_use]
    pub fn new(rpm: u32) -> Option<Self> {
        if rpm == 0 {
            return None;
        }

        let burst = rpm.min(GLOBAL_BURST_CAP) as usize;
        let permits = Arc::new(Semaphore::new(burst));
        let interval = Duration::from_secs(60) / rpm;

        let refill_permits = Arc::clone(&permits);
        let refill_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; the reservoir starts full,
            // so it is a no-op.
            loop {
                ticker.tick().await;
                if refill_permits.available_permits() < burst {
                    refill_permits.add_permits(1);
                }
            }
        });

        tracing::info!(rpm, burst, "global rate limit enabled");
        Some(Self {
            permits,
            refill_task,
        })
    }

    /// Wait for an admission token and consume it.
    pub async fn acquire(&self) {
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }

    #[cfg(test)]
    fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Drop for GlobalLimiter {
    fn drop(&mut self) {
        self.refill_task.abort();
    }
}

// ---------------------------------------------------------------------------
// Per-credential token bucket
// ---------------------------------------------------------------------------

/// Token bucket for one credential: `max = rpm` tokens, one token
/// regenerated every `60s / rpm`, refill capped at `max`.
pub struct KeyBucket {
    max: u32,
    interval: Duration,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

impl KeyBucket {
    /// Returns `None` when `rpm` is zero (no per-key limit).
    #[must_use]
    pub fn new(rpm: u32) -> Option<Self> {
        if rpm == 0 {
            return None;
        }
        Some(Self {
            max: rpm,
            interval: Duration::from_secs(60) / rpm,
            state: Mutex::new(BucketState {
                tokens: rpm,
                last_refill: Instant::now(),
            }),
        })
    }

    /// Consume one token if available.
    #[must_use]
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();

        let elapsed = now.saturating_duration_since(state.last_refill);
        let refill = (elapsed.as_nanos() / self.interval.as_nanos().max(1)) as u32;
        if refill > 0 {
            state.tokens = state.tokens.saturating_add(refill).min(self.max);
            state.last_refill = now;
        }

        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_bucket_zero_rpm_disabled() {
        assert!(KeyBucket::new(0).is_none());
    }

    #[test]
    fn test_key_bucket_drains_and_rejects() {
        let bucket = KeyBucket::new(2).unwrap();
        let now = Instant::now();
        assert!(bucket.allow_at(now));
        assert!(bucket.allow_at(now));
        assert!(!bucket.allow_at(now));
    }

    #[test]
    fn test_key_bucket_refills_over_time() {
        let bucket = KeyBucket::new(60).unwrap(); // one token per second
        let start = Instant::now();
        for _ in 0..60 {
            assert!(bucket.allow_at(start));
        }
        assert!(!bucket.allow_at(start));

        // One interval later exactly one token is back.
        let later = start + Duration::from_secs(1);
        assert!(bucket.allow_at(later));
        assert!(!bucket.allow_at(later));
    }

    #[test]
    fn test_key_bucket_refill_capped_at_max() {
        let bucket = KeyBucket::new(2).unwrap();
        let start = Instant::now();
        assert!(bucket.allow_at(start));

        // A very long idle period must not stack more than `max` tokens.
        let much_later = start + Duration::from_secs(3600);
        assert!(bucket.allow_at(much_later));
        assert!(bucket.allow_at(much_later));
        assert!(!bucket.allow_at(much_later));
    }

    #[tokio::test]
    async fn test_global_limiter_disabled_when_zero() {
        assert!(GlobalLimiter::new(0).is_none());
    }

    #[tokio::test]
    async fn test_global_limiter_burst_is_capped() {
        let limiter = GlobalLimiter::new(600).unwrap();
        assert_eq!(limiter.available(), 5);
        let limiter = GlobalLimiter::new(3).unwrap();
        assert_eq!(limiter.available(), 3);
    }

    #[tokio::test]
    async fn test_global_limiter_acquire_consumes() {
        let limiter = GlobalLimiter::new(120).unwrap();
        let before = limiter.available();
        limiter.acquire().await;
        assert_eq!(limiter.available(), before - 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_limiter_refills_one_per_interval() {
        let limiter = GlobalLimiter::new(60).unwrap();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(limiter.available(), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert!(limiter.available() >= 1);
    }
}
