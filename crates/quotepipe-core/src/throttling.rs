use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Spaces provider requests at least `interval` apart.
///
/// Clones share one limiter, so the spacing holds across concurrent workers.
/// A zero interval disables pacing.
#[derive(Clone)]
pub struct RequestPacer {
    limiter: Option<Arc<DirectRateLimiter>>,
    interval: Duration,
}

impl RequestPacer {
    pub fn new(interval: Duration) -> Self {
        let limiter = Quota::with_period(interval).map(|quota| Arc::new(RateLimiter::direct(quota)));
        Self { limiter, interval }
    }

    pub fn unpaced() -> Self {
        Self::new(Duration::ZERO)
    }

    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the next request may be sent.
    pub async fn ready(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

impl std::fmt::Debug for RequestPacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPacer")
            .field("interval", &self.interval)
            .field("enabled", &self.limiter.is_some())
            .finish()
    }
}
