use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

/// Token-bucket limiter for outbound model calls.
///
/// `acquire()` blocks until a token is available — exhaustion is
/// backpressure, never an error, and no request is ever dropped. The bucket
/// refills continuously at `requests_per_second` up to `max_burst`.
pub(crate) struct RateLimiter {
    requests_per_second: f64,
    max_burst: f64,
    check_interval: Duration,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub(crate) fn new(
        requests_per_second: f64,
        max_burst: f64,
        check_interval_secs: f64,
    ) -> Self {
        let max_burst = max_burst.max(1.0);
        RateLimiter {
            requests_per_second: requests_per_second.max(f64::MIN_POSITIVE),
            max_burst,
            check_interval: Duration::from_secs_f64(check_interval_secs.max(0.01)),
            state: Mutex::new(BucketState {
                // Start full so the first request never waits.
                tokens: max_burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take a token if one is available right now.
    pub(crate) fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.requests_per_second).min(self.max_burst);
        state.last_refill = now;
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Block until a token is available.
    pub(crate) fn acquire(&self) {
        while !self.try_acquire() {
            thread::sleep(self.check_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_allows_immediate_calls() {
        let limiter = RateLimiter::new(1.0, 3.0, 0.01);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_bucket_refills_over_time() {
        let limiter = RateLimiter::new(50.0, 1.0, 0.01);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        thread::sleep(Duration::from_millis(40));
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_one_per_second_spaces_calls() {
        // Two back-to-back acquires at 1 rps / burst 1 must be separated by
        // at least one second of wall clock, and neither may be dropped.
        let limiter = RateLimiter::new(1.0, 1.0, 0.05);
        let start = Instant::now();
        limiter.acquire();
        limiter.acquire();
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[test]
    fn test_tokens_capped_at_burst() {
        let limiter = RateLimiter::new(1000.0, 2.0, 0.01);
        thread::sleep(Duration::from_millis(20));
        // Refill far exceeds burst; only two tokens may be taken at once.
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
