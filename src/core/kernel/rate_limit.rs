use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::trace;

/// Token-bucket gate in front of an outbound channel.
///
/// A quota of `n` per `window` allows a burst of `n` and refills one
/// token every `window / n`. Callers that find the bucket empty wait.
#[derive(Debug)]
pub struct RateGate {
    name: &'static str,
    limiter: DefaultDirectRateLimiter,
}

impl RateGate {
    pub fn new(name: &'static str, requests: u32, window: Duration) -> Self {
        let burst = NonZeroU32::new(requests).unwrap_or(nonzero!(1u32));
        let period = window / burst.get();
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst);

        Self {
            name,
            limiter: RateLimiter::direct(quota),
        }
    }

    /// Default REST gate: 1200 requests per minute.
    pub fn rest_default() -> Self {
        Self::new("rest", 1200, Duration::from_secs(60))
    }

    /// WebSocket control frames: 5 per second per account.
    pub fn ws_control_default() -> Self {
        Self::new("ws-control", 5, Duration::from_secs(1))
    }

    /// Take a token, waiting for one if none is available.
    pub async fn acquire(&self) {
        if self.limiter.check().is_err() {
            trace!(gate = self.name, "rate gate exhausted, waiting");
            self.limiter.until_ready().await;
        }
    }

    /// Take a token only if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_empty() {
        let gate = RateGate::new("test", 3, Duration::from_secs(60));
        assert!(gate.try_acquire());
        assert!(gate.try_acquire());
        assert!(gate.try_acquire());
        assert!(!gate.try_acquire());
    }

    #[test]
    fn test_zero_quota_falls_back_to_one() {
        let gate = RateGate::new("test", 0, Duration::from_secs(60));
        assert!(gate.try_acquire());
        assert!(!gate.try_acquire());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let gate = RateGate::new("test", 1, Duration::from_millis(50));
        gate.acquire().await;
        let started = std::time::Instant::now();
        gate.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
