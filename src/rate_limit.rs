use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Minimum spacing between calls, per upstream.
///
/// The market API allows roughly one call per second; the travel
/// export is itself cached upstream for 30 seconds, so polling faster
/// than that only burns budget.
const MARKET_DELAY: Duration = Duration::from_millis(1100);
const BULK_FEED_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Market,
    BulkFeed,
}

/// Enforces minimum spacing between calls on each channel. The lock is
/// held across the sleep, so concurrent callers on one channel are
/// serialized rather than racing for the same timestamp.
#[derive(Debug)]
pub struct RateLimiter {
    market: Mutex<Option<Instant>>,
    bulk_feed: Mutex<Option<Instant>>,
    market_delay: Duration,
    bulk_feed_delay: Duration,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_delays(MARKET_DELAY, BULK_FEED_DELAY)
    }

    pub const fn with_delays(market_delay: Duration, bulk_feed_delay: Duration) -> Self {
        Self {
            market: Mutex::const_new(None),
            bulk_feed: Mutex::const_new(None),
            market_delay,
            bulk_feed_delay,
        }
    }

    /// Suspends until the channel's minimum delay has elapsed since the
    /// previous call, then records the new call time.
    pub async fn wait(&self, channel: Channel) {
        let (slot, delay) = match channel {
            Channel::Market => (&self.market, self.market_delay),
            Channel::BulkFeed => (&self.bulk_feed, self.bulk_feed_delay),
        };
        let mut last = slot.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < delay {
                tokio::time::sleep(delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_call_is_immediate() {
        let limiter = RateLimiter::with_delays(Duration::from_secs(5), Duration::from_secs(5));
        let start = Instant::now();
        limiter.wait(Channel::Market).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn second_call_waits_out_the_delay() {
        let limiter =
            RateLimiter::with_delays(Duration::from_millis(50), Duration::from_millis(50));
        limiter.wait(Channel::Market).await;
        let start = Instant::now();
        limiter.wait(Channel::Market).await;
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[tokio::test]
    async fn channels_are_independent() {
        let limiter =
            RateLimiter::with_delays(Duration::from_millis(200), Duration::from_millis(200));
        limiter.wait(Channel::Market).await;
        let start = Instant::now();
        limiter.wait(Channel::BulkFeed).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
