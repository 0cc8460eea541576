use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Caller-facing request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub limit: u32,
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            window_seconds: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Sliding-window log keyed by caller identity.
///
/// Each identity keeps the admission instants inside the current window.
/// Pruning, counting and recording happen under the identity's shard lock, so
/// concurrent requests from one caller never overshoot the limit while
/// unrelated callers proceed in parallel.
#[derive(Debug, Clone)]
pub struct SlidingWindowLimiter {
    limit: usize,
    window: Duration,
    log: Arc<DashMap<String, VecDeque<Instant>>>,
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl SlidingWindowLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            limit: config.limit as usize,
            window: config.window(),
            log: Arc::new(DashMap::new()),
        }
    }

    /// Admits and records one request, or returns the wait in whole seconds
    /// (at least one) until the oldest admission leaves the window.
    pub fn check(&self, identity: &str) -> Result<(), u64> {
        self.check_at(identity, Instant::now())
    }

    fn check_at(&self, identity: &str, now: Instant) -> Result<(), u64> {
        let mut entry = self.log.entry(identity.to_owned()).or_default();
        let admitted = entry.value_mut();
        while admitted
            .front()
            .is_some_and(|at| now.saturating_duration_since(*at) >= self.window)
        {
            admitted.pop_front();
        }

        if admitted.len() >= self.limit {
            let wait = admitted
                .front()
                .map(|oldest| self.window.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or(self.window);
            let emptied = admitted.is_empty();
            drop(entry);
            if emptied {
                self.log.remove_if(identity, |_, admitted| admitted.is_empty());
            }
            return Err(ceil_seconds(wait).max(1));
        }

        admitted.push_back(now);
        Ok(())
    }

    /// Drops identities with no admissions inside the window.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.log.len();
        self.log.retain(|_, admitted| {
            admitted
                .back()
                .is_some_and(|at| now.saturating_duration_since(*at) < self.window)
        });
        before - self.log.len()
    }

    pub fn tracked_identities(&self) -> usize {
        self.log.len()
    }
}

fn ceil_seconds(duration: Duration) -> u64 {
    let whole = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        whole + 1
    } else {
        whole
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32, window_seconds: u64) -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(RateLimitConfig {
            limit,
            window_seconds,
        })
    }

    #[test]
    fn second_request_inside_window_is_rejected() {
        let limiter = limiter(1, 2);
        let start = Instant::now();

        assert_eq!(limiter.check_at("alice", start), Ok(()));
        assert_eq!(
            limiter.check_at("alice", start + Duration::from_millis(500)),
            Err(2)
        );
        assert_eq!(limiter.check_at("bob", start), Ok(()));
    }

    #[test]
    fn admissions_expire_with_the_window() {
        let limiter = limiter(2, 10);
        let start = Instant::now();

        limiter.check_at("alice", start).unwrap();
        limiter.check_at("alice", start + Duration::from_secs(4)).unwrap();
        assert_eq!(
            limiter.check_at("alice", start + Duration::from_secs(9)),
            Err(1)
        );
        assert_eq!(limiter.check_at("alice", start + Duration::from_secs(10)), Ok(()));
    }

    #[test]
    fn rejections_are_not_recorded() {
        let limiter = limiter(1, 5);
        let start = Instant::now();

        limiter.check_at("alice", start).unwrap();
        for offset in 1..4 {
            assert!(limiter
                .check_at("alice", start + Duration::from_secs(offset))
                .is_err());
        }
        assert_eq!(limiter.check_at("alice", start + Duration::from_secs(5)), Ok(()));
    }

    #[test]
    fn zero_limit_always_rejects() {
        let limiter = limiter(0, 60);
        assert_eq!(limiter.check("alice"), Err(60));
        assert_eq!(limiter.tracked_identities(), 0);
    }

    #[test]
    fn concurrent_callers_never_overshoot_the_limit() {
        let limiter = limiter(5, 60);

        let admitted = std::thread::scope(|scope| {
            let workers = (0..16)
                .map(|_| scope.spawn(|| limiter.check("alice").is_ok()))
                .collect::<Vec<_>>();
            workers
                .into_iter()
                .map(|worker| worker.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });

        assert_eq!(admitted, 5);
        assert_eq!(limiter.check("alice"), Err(60));
    }

    #[test]
    fn sweep_drops_idle_identities() {
        let limiter = limiter(5, 0);
        limiter.check("alice").unwrap();
        limiter.check("bob").unwrap();

        assert_eq!(limiter.sweep(), 2);
        assert_eq!(limiter.tracked_identities(), 0);
    }
}
