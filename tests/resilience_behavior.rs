//! Behavior-driven tests for the resilience layer: circuit breakers, caller
//! rate limiting, idempotency store outages, maintenance sweeps and vendor
//! transport failures.

mod support;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use support::{bearer, bearer_for, firewall_payload, harness, harness_with, DownStore, INSTANCE};
use vnfbroker_core::{
    CircuitBreakerConfig, CircuitState, ErrorKind, HealthStatus, HttpError,
    MemoryIdempotencyStore, RateLimitConfig, SweepReport, UnavailablePolicy,
};

const SERVER_ERROR: &str = r#"{"status":"error","message":"internal server error"}"#;

fn delete_payload() -> serde_json::Value {
    json!({"vnfInstanceId": INSTANCE, "ruleId": "fw-1"})
}

// =============================================================================
// Circuit breaker
// =============================================================================

#[tokio::test]
async fn when_backend_keeps_failing_system_opens_circuit_and_stops_calling_it() {
    // Given: A breaker that opens after two failed operations
    let harness = harness_with(|builder| {
        builder.with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            open_timeout: Duration::from_secs(60),
        })
    });
    harness.mock.set_fallback(500, SERVER_ERROR);
    let token = bearer("vnf:rw");

    // When: Two deletes fail after exhausting their retries
    for _ in 0..2 {
        let response = harness.broker.delete_firewall_rule(Some(&token), &delete_payload()).await;
        assert_eq!(response.error_kind(), Some(ErrorKind::UpstreamError));
    }
    let calls_before = harness.mock.request_count();

    // Then: The next request fails fast without touching the appliance
    let response = harness.broker.delete_firewall_rule(Some(&token), &delete_payload()).await;
    assert_eq!(response.error_kind(), Some(ErrorKind::BackendUnavailable));
    assert_eq!(response.http_status(), 503);
    assert!(response.error.as_ref().is_some_and(|error| error.retryable));
    assert_eq!(harness.mock.request_count(), calls_before);
    assert_eq!(calls_before, 6, "each failing delete uses its three attempts");

    // And: The snapshot exposes the open circuit
    let metrics = harness.broker.metrics();
    let circuit = &metrics.circuit_breakers[INSTANCE];
    assert_eq!(circuit.state, CircuitState::Open);
    assert_eq!(circuit.consecutive_failures, 2);
    assert_eq!(metrics.operations["delete_firewall_rule"].failures, 2);
    assert_eq!(metrics.operations["delete_firewall_rule"].rejections, 1);
}

#[tokio::test]
async fn when_open_timeout_elapses_system_tries_again_and_closes_on_success() {
    // Given: An open circuit with a short cool-down
    let harness = harness_with(|builder| {
        builder.with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            open_timeout: Duration::from_millis(100),
        })
    });
    let token = bearer("vnf:rw");
    harness.mock.set_fallback(500, SERVER_ERROR);
    harness.broker.delete_firewall_rule(Some(&token), &delete_payload()).await;
    assert_eq!(harness.broker.circuit_breakers().state(INSTANCE), CircuitState::Open);

    // When: The cool-down passes and the appliance has recovered
    tokio::time::sleep(Duration::from_millis(150)).await;
    harness.mock.set_fallback(200, r#"{"status":"ok"}"#);
    let response = harness.broker.delete_firewall_rule(Some(&token), &delete_payload()).await;

    // Then: The trial call succeeds and the circuit closes
    assert!(response.success, "{response:?}");
    assert_eq!(harness.broker.circuit_breakers().state(INSTANCE), CircuitState::Closed);
}

#[tokio::test]
async fn when_vendor_rejects_payload_system_does_not_count_it_against_circuit() {
    // Given: A breaker that would open on the first backend failure
    let harness = harness_with(|builder| {
        builder.with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            open_timeout: Duration::from_secs(60),
        })
    });
    harness
        .mock
        .push_response(400, r#"{"status":"error","message":"invalid interface"}"#);

    // When: The appliance rejects a create as invalid
    let response = harness
        .broker
        .create_firewall_rule(Some(&bearer("vnf:rw")), &firewall_payload())
        .await;

    // Then: The caller sees a validation error and the circuit stays closed
    assert_eq!(response.error_kind(), Some(ErrorKind::ValidationError));
    assert_eq!(harness.broker.circuit_breakers().state(INSTANCE), CircuitState::Closed);
}

#[tokio::test]
async fn when_circuit_is_half_open_system_admits_one_trial_call_at_a_time() {
    // Given: An open circuit whose cool-down has passed
    let harness = harness_with(|builder| {
        builder.with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            open_timeout: Duration::from_millis(50),
        })
    });
    harness.mock.set_fallback(500, SERVER_ERROR);
    harness.broker.delete_firewall_rule(Some(&bearer("vnf:rw")), &delete_payload()).await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    let breakers = harness.broker.circuit_breakers();

    // When: One caller is admitted and has not finished yet
    assert!(breakers.allow_request(INSTANCE));

    // Then: Everyone else is turned away until it ends
    assert_eq!(breakers.state(INSTANCE), CircuitState::HalfOpen);
    assert!(!breakers.allow_request(INSTANCE));
    breakers.release(INSTANCE);
    assert!(breakers.allow_request(INSTANCE));
}

#[tokio::test]
async fn when_trial_call_is_refused_locally_system_frees_the_half_open_slot() {
    // Given: A half-open circuit in front of a recovered appliance
    let harness = harness_with(|builder| {
        builder.with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            open_timeout: Duration::from_millis(50),
        })
    });
    let token = bearer("vnf:rw");
    harness.mock.set_fallback(500, SERVER_ERROR);
    harness.broker.delete_firewall_rule(Some(&token), &delete_payload()).await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    harness.mock.set_fallback(200, r#"{"status":"ok"}"#);

    // When: The admitted call is refused before the appliance is contacted
    let refused = harness
        .broker
        .delete_nat_rule(Some(&token), &json!({"vnfInstanceId": INSTANCE, "ruleId": "nat-1"}))
        .await;

    // Then: The circuit stays half-open and the next call gets through
    assert_eq!(refused.error_kind(), Some(ErrorKind::ValidationError));
    assert_eq!(harness.broker.circuit_breakers().state(INSTANCE), CircuitState::HalfOpen);
    let response = harness.broker.delete_firewall_rule(Some(&token), &delete_payload()).await;
    assert!(response.success, "{response:?}");
    assert_eq!(harness.broker.circuit_breakers().state(INSTANCE), CircuitState::Closed);
}

#[tokio::test]
async fn when_appliance_answers_with_rejection_while_half_open_system_closes_circuit() {
    // Given: A half-open circuit
    let harness = harness_with(|builder| {
        builder.with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            open_timeout: Duration::from_millis(50),
        })
    });
    let token = bearer("vnf:rw");
    harness.mock.set_fallback(500, SERVER_ERROR);
    harness.broker.delete_firewall_rule(Some(&token), &delete_payload()).await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    // When: The appliance rejects the admitted call as invalid
    harness
        .mock
        .push_response(400, r#"{"status":"error","message":"invalid interface"}"#);
    let response = harness.broker.create_firewall_rule(Some(&token), &firewall_payload()).await;

    // Then: The answer proves the appliance is alive and the circuit closes
    assert_eq!(response.error_kind(), Some(ErrorKind::ValidationError));
    assert_eq!(harness.broker.circuit_breakers().state(INSTANCE), CircuitState::Closed);
}

// =============================================================================
// Caller rate limiting
// =============================================================================

#[tokio::test]
async fn when_caller_exceeds_window_system_answers_rate_limited_with_retry_after() {
    // Given: One request per two-second window
    let harness = harness_with(|builder| {
        builder.with_rate_limit(RateLimitConfig {
            limit: 1,
            window_seconds: 2,
        })
    });
    let token = bearer("vnf:r");
    let payload = json!({"vnfInstanceId": INSTANCE});

    // When: The same caller lists twice
    let first = harness.broker.list_firewall_rules(Some(&token), &payload).await;
    let second = harness.broker.list_firewall_rules(Some(&token), &payload).await;

    // Then: The second request is throttled before reaching the appliance
    assert!(first.success);
    assert_eq!(second.error_kind(), Some(ErrorKind::RateLimitExceeded));
    assert_eq!(second.http_status(), 429);
    let error = second.error.expect("error body is present");
    assert!(error.retryable);
    assert!(matches!(error.retry_after_seconds, Some(1..=2)));
    assert_eq!(harness.mock.request_count(), 1);

    // And: Another caller has its own window
    let other = harness
        .broker
        .list_firewall_rules(Some(&bearer_for("auditor", "vnf:r")), &payload)
        .await;
    assert!(other.success);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn when_one_caller_floods_concurrently_system_admits_exactly_the_limit() {
    // Given: Three requests per minute
    let harness = harness_with(|builder| {
        builder.with_rate_limit(RateLimitConfig {
            limit: 3,
            window_seconds: 60,
        })
    });
    let token = bearer("vnf:r");
    let payload = json!({"vnfInstanceId": INSTANCE});

    // When: The same caller fires ten lists at once
    let calls: Vec<_> = (0..10)
        .map(|_| {
            let broker = harness.broker.clone();
            let token = token.clone();
            let payload = payload.clone();
            tokio::spawn(async move { broker.list_firewall_rules(Some(&token), &payload).await })
        })
        .collect();
    let mut admitted = 0;
    let mut throttled = 0;
    for call in calls {
        let response = call.await.unwrap();
        match response.error_kind() {
            None => admitted += 1,
            Some(ErrorKind::RateLimitExceeded) => throttled += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    // Then: Exactly the limit got through
    assert_eq!(admitted, 3);
    assert_eq!(throttled, 7);
    assert_eq!(harness.mock.request_count(), 3);
}

// =============================================================================
// Idempotency store outages
// =============================================================================

#[tokio::test]
async fn when_store_is_down_and_policy_is_fail_closed_system_rejects_mutations() {
    // Given: An unreachable store and a fail-closed policy
    let harness = harness_with(|builder| {
        builder
            .with_store(Arc::new(DownStore))
            .with_unavailable_policy(UnavailablePolicy::FailClosed)
    });

    // When: A rule is created
    let response = harness
        .broker
        .create_firewall_rule(Some(&bearer("vnf:rw")), &firewall_payload())
        .await;

    // Then: Nothing reaches the appliance
    assert_eq!(response.error_kind(), Some(ErrorKind::InternalError));
    assert_eq!(harness.mock.request_count(), 0);
}

#[tokio::test]
async fn when_store_is_down_and_policy_is_fail_open_system_proceeds_without_retries() {
    // Given: An unreachable store and the default fail-open policy
    let harness = harness_with(|builder| builder.with_store(Arc::new(DownStore)));
    let token = bearer("vnf:rw");

    // When: A create succeeds and a second create meets a transient error
    let created = harness.broker.create_firewall_rule(Some(&token), &firewall_payload()).await;
    harness.mock.push_response(503, SERVER_ERROR);
    let mut payload = firewall_payload();
    payload["ruleId"] = json!("fw-2");
    let failed = harness.broker.create_firewall_rule(Some(&token), &payload).await;

    // Then: The first went through unguarded
    assert!(created.success, "{created:?}");
    assert!(!created.diagnostics.as_ref().is_some_and(|d| d.cached));

    // And: The unguarded POST was not repeated
    assert_eq!(failed.error_kind(), Some(ErrorKind::UpstreamError));
    assert_eq!(harness.calls_to("POST", "/api/v1/firewall/rule"), 2);

    // And: Health reports the degraded store
    let report = harness.broker.health().await;
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.idempotency_store.status, "unavailable");
    assert_eq!(report.idempotency_store.error.as_deref(), Some("connection refused"));
}

#[tokio::test]
async fn when_store_is_down_reads_are_unaffected() {
    // Given: An unreachable store and a fail-closed policy
    let harness = harness_with(|builder| {
        builder
            .with_store(Arc::new(DownStore))
            .with_unavailable_policy(UnavailablePolicy::FailClosed)
    });

    // When: Rules are listed
    let response = harness
        .broker
        .list_firewall_rules(Some(&bearer("vnf:r")), &json!({"vnfInstanceId": INSTANCE}))
        .await;

    // Then: Listing never consults the store
    assert!(response.success, "{response:?}");
}

// =============================================================================
// Maintenance
// =============================================================================

#[tokio::test]
async fn when_sweep_runs_system_drops_idle_callers_and_expired_results() {
    // Given: Results that expire at once and a window that closes at once
    let store = MemoryIdempotencyStore::new();
    let harness = harness_with(|builder| {
        builder
            .with_store(Arc::new(store.clone()))
            .with_idempotency_ttl(Duration::ZERO)
            .with_rate_limit(RateLimitConfig {
                limit: 10,
                window_seconds: 0,
            })
    });
    let created = harness
        .broker
        .create_firewall_rule(Some(&bearer("vnf:rw")), &firewall_payload())
        .await;
    assert!(created.success, "{created:?}");
    assert!(!store.is_empty().await);

    // When: The broker is swept
    let report = harness.broker.sweep().await;

    // Then: The caller window, the result and its rule marker are gone
    assert_eq!(
        report,
        SweepReport {
            idle_callers: 1,
            expired_results: 2,
        }
    );
    assert!(store.is_empty().await);
    assert_eq!(harness.broker.sweep().await, SweepReport::default());
}

#[tokio::test(start_paused = true)]
async fn when_maintenance_task_runs_system_sweeps_on_its_interval() {
    // Given: An expired result and a maintenance task sweeping every minute
    let store = MemoryIdempotencyStore::new();
    let harness = harness_with(|builder| {
        builder
            .with_store(Arc::new(store.clone()))
            .with_idempotency_ttl(Duration::ZERO)
    });
    harness
        .broker
        .create_firewall_rule(Some(&bearer("vnf:rw")), &firewall_payload())
        .await;
    let maintenance = harness.broker.spawn_maintenance(Duration::from_secs(60));

    // When: A minute passes
    assert!(!store.is_empty().await);
    tokio::time::sleep(Duration::from_secs(61)).await;

    // Then: The store was purged without anyone calling sweep
    assert!(store.is_empty().await);
    maintenance.abort();
}

// =============================================================================
// Vendor transport failures
// =============================================================================

#[tokio::test]
async fn when_vendor_times_out_system_retries_then_reports_upstream_timeout() {
    // Given: An appliance that never answers in time
    let harness = harness();
    harness
        .mock
        .set_fallback_error(HttpError::timeout("operation timed out"));

    // When: A rule is deleted
    let response = harness.broker.delete_firewall_rule(Some(&bearer("vnf:rw")), &delete_payload()).await;

    // Then: Every attempt was made and the timeout is retryable
    assert_eq!(response.error_kind(), Some(ErrorKind::UpstreamTimeout));
    assert_eq!(response.http_status(), 504);
    assert!(response.error.as_ref().is_some_and(|error| error.retryable));
    assert_eq!(harness.mock.request_count(), 3);
}

#[tokio::test]
async fn when_vendor_is_unreachable_system_reports_upstream_unreachable() {
    // Given: An appliance refusing connections
    let harness = harness();
    harness
        .mock
        .set_fallback_error(HttpError::connect("connection refused"));

    // When: Rules are listed
    let response = harness
        .broker
        .list_firewall_rules(Some(&bearer("vnf:r")), &json!({"vnfInstanceId": INSTANCE}))
        .await;

    // Then: The failure is classified as unreachable
    assert_eq!(response.error_kind(), Some(ErrorKind::UpstreamUnreachable));
    assert_eq!(response.http_status(), 502);
}

#[tokio::test(start_paused = true)]
async fn when_vendor_stalls_once_system_recovers_on_retry() {
    // Given: An appliance whose first answer arrives after the 30s timeout
    let harness = harness();
    harness
        .mock
        .push_delayed(Duration::from_secs(60), 200, r#"{"status":"ok","data":{"rules":[]}}"#);

    // When: Rules are listed
    let response = harness
        .broker
        .list_firewall_rules(Some(&bearer("vnf:r")), &json!({"vnfInstanceId": INSTANCE}))
        .await;

    // Then: The second attempt succeeds
    assert!(response.success, "{response:?}");
    assert_eq!(response.diagnostics.map(|d| d.attempts), Some(2));
    assert_eq!(harness.mock.request_count(), 2);
}
