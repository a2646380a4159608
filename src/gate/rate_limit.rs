use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::time::Duration;

use crate::config::types::RateLimitRule;

const SHRINK_THRESHOLD: usize = 10_000;

/// Per-client-IP limiter allowing bursts of `max_requests`, refilled evenly
/// over `window`.
pub struct ClientRateLimiter {
    limiter: DefaultKeyedRateLimiter<IpAddr>,
    clock: DefaultClock,
}

impl ClientRateLimiter {
    pub fn new(rule: RateLimitRule) -> Self {
        let burst = NonZeroU32::new(rule.max_requests).unwrap_or(NonZeroU32::MIN);
        let period = rule.window / burst.get();
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst);

        Self {
            limiter: RateLimiter::keyed(quota),
            clock: DefaultClock::default(),
        }
    }

    /// Count one request from `client`. On refusal returns how long until
    /// the next request would be allowed.
    pub fn check(&self, client: IpAddr) -> Result<(), Duration> {
        if self.limiter.len() > SHRINK_THRESHOLD {
            self.limiter.retain_recent();
        }

        self.limiter
            .check_key(&client)
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}
