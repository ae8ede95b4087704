//! Per-client rate-limit discipline: a local minimum inter-request gap
//! plus reactive sleeping on 429/`remaining=0`. No cross-provider
//! coordinator — each client owns its own limiter.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

pub const MAX_ATTEMPTS: u32 = 3;

pub struct RateLimiter {
    min_gap: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_request: Mutex::new(None),
        }
    }

    pub fn none() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Sleeps if necessary so calls are spaced at least `min_gap` apart.
    pub async fn wait(&self) {
        if self.min_gap.is_zero() {
            return;
        }
        let mut guard = self.last_request.lock().await;
        if let Some(last) = *guard {
            let elapsed = last.elapsed();
            if elapsed < self.min_gap {
                tokio::time::sleep(self.min_gap - elapsed).await;
            }
        }
        *guard = Some(Instant::now());
    }

    /// Sleep reactively when the server signals it is out of budget.
    pub async fn back_off(&self, retry_after: Duration) {
        tracing::warn!(millis = retry_after.as_millis() as u64, "rate limited, sleeping");
        tokio::time::sleep(retry_after).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_enforces_minimum_gap() {
        let limiter = RateLimiter::new(Duration::from_millis(30));
        let start = Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn zero_gap_never_sleeps() {
        let limiter = RateLimiter::none();
        let start = Instant::now();
        for _ in 0..5 {
            limiter.wait().await;
        }
        assert!(start.elapsed() < Duration::from_millis(20));
    }
}
