use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

use crate::dictionary::VendorRateLimit;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Outbound quota shared by every request sent to one vendor dictionary.
///
/// Unlike the caller-facing sliding window, this protects the appliance: a
/// burst from many callers is cut off before it reaches the transport.
#[derive(Clone)]
pub struct VendorThrottle {
    limiter: Arc<DirectRateLimiter>,
    clock: DefaultClock,
}

impl std::fmt::Debug for VendorThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorThrottle").finish_non_exhaustive()
    }
}

impl VendorThrottle {
    pub fn new(window: Duration, limit: u32) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::direct(quota_from_window(window, limit))),
            clock: DefaultClock::default(),
        }
    }

    pub fn from_limit(limit: VendorRateLimit) -> Self {
        Self::new(Duration::from_secs(limit.per_seconds), limit.requests)
    }

    /// Takes one cell of budget, or reports how long until one is available.
    pub fn acquire(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

fn quota_from_window(window: Duration, limit: u32) -> Quota {
    let burst = NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN);
    let seconds_per_cell = (window.as_secs_f64() / f64::from(burst.get())).max(0.001);

    Quota::with_period(Duration::from_secs_f64(seconds_per_cell))
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}
