//! Request pacing against the upstream API

use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Limiter shared by every request a client makes
#[derive(Clone)]
pub struct RequestPacer {
    limiter: Arc<DirectLimiter>,
}

impl RequestPacer {
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(nonzero!(1u32));
        Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
        }
    }

    /// Wait until a request is allowed
    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_burst_is_immediate() {
        let pacer = RequestPacer::new(100);
        let start = Instant::now();
        for _ in 0..10 {
            pacer.wait().await;
        }
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_pacing_beyond_quota() {
        let pacer = RequestPacer::new(2);
        let start = Instant::now();
        for _ in 0..4 {
            pacer.wait().await;
        }
        // burst of 2, then two more at 500ms each
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_zero_rate_falls_back_to_one() {
        let pacer = RequestPacer::new(0);
        pacer.wait().await;
    }
}
