use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::data_source::SourceError;
use crate::source_policy::SourcePolicy;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-source throttle: caps in-flight requests and spaces request starts.
///
/// The rate limiter enforces the minimum delay between request starts; a
/// random extra pause up to the maximum delay keeps the request rhythm from
/// looking scripted.
#[derive(Clone)]
pub struct SourceThrottle {
    limiter: Option<Arc<DirectRateLimiter>>,
    slots: Arc<Semaphore>,
    extra_delay_ms: u64,
}

/// Held while a store request is in flight; dropping it frees the slot.
pub struct ThrottlePermit {
    _slot: OwnedSemaphorePermit,
}

impl SourceThrottle {
    pub fn new(max_concurrency: usize, min_delay: Duration, max_delay: Duration) -> Self {
        let extra = max_delay.saturating_sub(min_delay);
        Self {
            limiter: quota_from_delay(min_delay).map(|quota| Arc::new(RateLimiter::direct(quota))),
            slots: Arc::new(Semaphore::new(max_concurrency.max(1))),
            extra_delay_ms: extra.as_millis() as u64,
        }
    }

    pub fn from_policy(policy: &SourcePolicy) -> Self {
        Self::new(
            policy.max_concurrency,
            policy.min_request_delay,
            policy.max_request_delay,
        )
    }

    /// Waits for a free slot and for the rate budget, in that order.
    pub async fn acquire(&self) -> Result<ThrottlePermit, SourceError> {
        let slot = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| SourceError::internal("source throttle was closed"))?;

        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        if self.extra_delay_ms > 0 {
            let pause = fastrand::u64(0..=self.extra_delay_ms);
            tokio::time::sleep(Duration::from_millis(pause)).await;
        }

        Ok(ThrottlePermit { _slot: slot })
    }

    #[cfg(test)]
    fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}

fn quota_from_delay(min_delay: Duration) -> Option<Quota> {
    if min_delay.is_zero() {
        return None;
    }
    Quota::with_period(min_delay).map(|quota| quota.allow_burst(NonZeroU32::MIN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn caps_in_flight_requests() {
        let throttle = SourceThrottle::new(2, Duration::ZERO, Duration::ZERO);

        let first = throttle.acquire().await.expect("slot");
        let _second = throttle.acquire().await.expect("slot");
        assert_eq!(throttle.available_slots(), 0);

        drop(first);
        assert_eq!(throttle.available_slots(), 1);
    }

    #[tokio::test]
    async fn spaces_request_starts_by_the_minimum_delay() {
        let throttle = SourceThrottle::new(4, Duration::from_millis(40), Duration::from_millis(40));
        let started = Instant::now();

        for _ in 0..3 {
            let _permit = throttle.acquire().await.expect("slot");
        }

        assert!(started.elapsed() >= Duration::from_millis(75));
    }

    #[test]
    fn zero_delay_disables_rate_limiting() {
        assert!(quota_from_delay(Duration::ZERO).is_none());
        assert!(quota_from_delay(Duration::from_millis(200)).is_some());
    }
}
