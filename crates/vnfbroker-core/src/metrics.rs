use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use time::OffsetDateTime;

use crate::circuit_breaker::CircuitSnapshot;

#[derive(Debug, Default)]
struct OperationCounters {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    cache_hits: AtomicU64,
    rejections: AtomicU64,
}

/// How a request ended, from the counters' point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    CacheHit,
    /// Stopped by auth, rate limit, validation or an open circuit.
    Rejected,
    Failure,
}

/// Lock-free per-operation counters.
#[derive(Debug, Clone, Default)]
pub struct BrokerMetrics {
    operations: Arc<DashMap<&'static str, OperationCounters>>,
}

impl BrokerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, operation: &'static str, outcome: RequestOutcome) {
        let counters = self.operations.entry(operation).or_default();
        counters.requests.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            RequestOutcome::Success => &counters.successes,
            RequestOutcome::CacheHit => &counters.cache_hits,
            RequestOutcome::Rejected => &counters.rejections,
            RequestOutcome::Failure => &counters.failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn operations(&self) -> BTreeMap<String, OperationStats> {
        self.operations
            .iter()
            .map(|entry| {
                let counters = entry.value();
                (
                    (*entry.key()).to_owned(),
                    OperationStats {
                        requests: counters.requests.load(Ordering::Relaxed),
                        successes: counters.successes.load(Ordering::Relaxed),
                        failures: counters.failures.load(Ordering::Relaxed),
                        cache_hits: counters.cache_hits.load(Ordering::Relaxed),
                        rejections: counters.rejections.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStats {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub rejections: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub operations: BTreeMap<String, OperationStats>,
    pub circuit_breakers: BTreeMap<String, CircuitSnapshot>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreHealth {
    /// `connected` or `unavailable`.
    pub status: String,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub idempotency_store: StoreHealth,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}
