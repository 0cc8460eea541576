use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Runtime circuit state for one VNF backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    #[serde(with = "seconds")]
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            open_timeout: Duration::from_secs(30),
        }
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

impl Default for CircuitInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            last_failure: None,
            trial_in_flight: false,
        }
    }
}

/// Thread-safe circuit breaker for calls to one backend.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CircuitInner::default()),
        }
    }

    /// Gate for the next call. An open circuit turns half-open once the open
    /// timeout has passed since the last failure. A half-open circuit admits
    /// one trial call at a time; it ends with a recorded outcome or
    /// [`CircuitBreaker::release`].
    pub fn allow_request(&self) -> bool {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return false;
                }
                inner.trial_in_flight = true;
                true
            }
            CircuitState::Open => {
                let can_try = inner
                    .last_failure
                    .map(|at| at.elapsed() >= self.config.open_timeout)
                    .unwrap_or(true);

                if can_try {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.trial_in_flight = true;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Returns the new state when this success changed it.
    pub fn record_success(&self) -> Option<CircuitState> {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        match inner.state {
            CircuitState::HalfOpen => {
                inner.trial_in_flight = false;
                inner.half_open_successes = inner.half_open_successes.saturating_add(1);
                if inner.half_open_successes >= self.config.success_threshold.max(1) {
                    *inner = CircuitInner::default();
                    return Some(CircuitState::Closed);
                }
                None
            }
            // late success of a call admitted before the circuit opened
            CircuitState::Open => None,
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                None
            }
        }
    }

    /// Returns the new state when this failure changed it.
    pub fn record_failure(&self) -> Option<CircuitState> {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.trial_in_flight = false;

        let trips = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => {
                inner.consecutive_failures >= self.config.failure_threshold.max(1)
            }
            CircuitState::Open => false,
        };
        if trips {
            inner.state = CircuitState::Open;
            inner.half_open_successes = 0;
            return Some(CircuitState::Open);
        }
        None
    }

    /// Ends an admitted call that said nothing about backend health, such as
    /// one refused locally before the appliance was contacted.
    pub fn release(&self) {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.trial_in_flight = false;
    }

    pub fn state(&self) -> CircuitState {
        let inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        let inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.consecutive_failures
    }

    fn snapshot(&self) -> CircuitSnapshot {
        let inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            seconds_since_last_failure: inner.last_failure.map(|at| at.elapsed().as_secs()),
        }
    }
}

/// Point-in-time view of one breaker, reported through metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_since_last_failure: Option<u64>,
}

/// One breaker per backend identity, created on first use.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Arc::new(DashMap::new()),
        }
    }

    pub fn breaker(&self, backend: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(backend.to_owned())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config)))
            .clone()
    }

    pub fn allow_request(&self, backend: &str) -> bool {
        let allowed = self.breaker(backend).allow_request();
        if !allowed {
            warn!(backend, "circuit open, rejecting request");
        }
        allowed
    }

    pub fn record_success(&self, backend: &str) {
        if let Some(state) = self.breaker(backend).record_success() {
            info!(backend, ?state, "circuit state changed");
        }
    }

    pub fn record_failure(&self, backend: &str) {
        if let Some(state) = self.breaker(backend).record_failure() {
            warn!(backend, ?state, "circuit state changed");
        }
    }

    pub fn release(&self, backend: &str) {
        if let Some(breaker) = self.breakers.get(backend) {
            breaker.release();
        }
    }

    pub fn state(&self, backend: &str) -> CircuitState {
        self.breakers
            .get(backend)
            .map(|breaker| breaker.state())
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot(&self) -> BTreeMap<String, CircuitSnapshot> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }
}
