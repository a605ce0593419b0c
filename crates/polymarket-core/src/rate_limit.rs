//! Minimum-interval rate limiter shared by concurrent API callers.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum interval between calls.
///
/// Callers queue on a fair mutex, so permits are handed out in arrival order.
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Limiter allowing `per_second` calls per second (at least one).
    pub fn per_second(per_second: u32) -> Self {
        Self::with_interval(Duration::from_secs(1) / per_second.max(1))
    }

    pub fn with_interval(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the next call is allowed.
    pub async fn acquire(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(last) = *last_call {
            let next_allowed = last + self.min_interval;
            if Instant::now() < next_allowed {
                tokio::time::sleep_until(next_allowed).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}
