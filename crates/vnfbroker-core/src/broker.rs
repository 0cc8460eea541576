//! Request orchestration.
//!
//! Every operation runs the same pipeline:
//!
//! ```text
//! auth -> rate limit -> payload validation -> idempotency lookup
//!      -> circuit breaker gate -> dictionary engine -> record result
//! ```
//!
//! Failures before the engine never touch shared state beyond the rate
//! limiter's admission log. Only backend failures (timeouts, unreachable
//! appliances, upstream errors) count against a circuit, and only successful
//! results are cached.
//!
//! Each rule also has a marker record naming the last mutation applied to it.
//! A cached result is replayed only while the marker still names it, so
//! create, delete, create reaches the appliance three times.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::auth::{Access, AuthGate};
use crate::backend::BackendRegistry;
use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::config::BrokerConfig;
use crate::domain::{
    parse_payload, FirewallRule, ListRules, NatRule, NatRuleRef, RulePayload, RuleRef,
};
use crate::engine::{ExecuteOptions, HookFailure};
use crate::error::{BrokerError, ErrorKind};
use crate::idempotency::{
    Availability, CachedResult, IdempotencyKey, IdempotencyStore, MemoryIdempotencyStore,
    UnavailablePolicy, DEFAULT_TTL,
};
use crate::metrics::{
    BrokerMetrics, HealthReport, HealthStatus, MetricsSnapshot, RequestOutcome, StoreHealth,
};
use crate::rate_limiter::{RateLimitConfig, SlidingWindowLimiter};

/// Canonical operations exposed by the broker. The name doubles as the
/// dictionary operation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateFirewallRule,
    UpdateFirewallRule,
    DeleteFirewallRule,
    ListFirewallRules,
    CreateNatRule,
    DeleteNatRule,
}

impl Operation {
    pub const fn name(self) -> &'static str {
        match self {
            Self::CreateFirewallRule => "create_firewall_rule",
            Self::UpdateFirewallRule => "update_firewall_rule",
            Self::DeleteFirewallRule => "delete_firewall_rule",
            Self::ListFirewallRules => "list_firewall_rules",
            Self::CreateNatRule => "create_nat_rule",
            Self::DeleteNatRule => "delete_nat_rule",
        }
    }

    pub const fn is_mutating(self) -> bool {
        !matches!(self, Self::ListFirewallRules)
    }

    fn access(self) -> Access {
        if self.is_mutating() {
            Access::Write
        } else {
            Access::Read
        }
    }

    fn completed_status(self) -> &'static str {
        match self {
            Self::CreateFirewallRule | Self::CreateNatRule => "created",
            Self::UpdateFirewallRule => "updated",
            Self::DeleteFirewallRule | Self::DeleteNatRule => "deleted",
            Self::ListFirewallRules => "listed",
        }
    }

    /// Rule namespace shared by the operations that mutate one kind of rule.
    pub const fn family(self) -> &'static str {
        match self {
            Self::CreateNatRule | Self::DeleteNatRule => "nat",
            _ => "firewall",
        }
    }

    fn idempotency_key<P: RulePayload>(self, payload: &P, canonical: &Value) -> IdempotencyKey {
        let Some(rule_id) = payload.rule_id() else {
            return IdempotencyKey::from_payload(self.name(), canonical);
        };
        match self {
            Self::CreateFirewallRule | Self::CreateNatRule => IdempotencyKey::for_client_rule(
                self.name(),
                payload.instance_id().as_str(),
                rule_id.as_str(),
            ),
            _ => IdempotencyKey::scoped_to_rule(
                self.name(),
                payload.instance_id().as_str(),
                rule_id.as_str(),
                canonical,
            ),
        }
    }

    fn rule_marker<P: RulePayload>(self, payload: &P) -> Option<IdempotencyKey> {
        let rule_id = payload.rule_id()?;
        Some(IdempotencyKey::latest_for_rule(
            self.family(),
            payload.instance_id().as_str(),
            rule_id.as_str(),
        ))
    }
}

/// Error body of a [`BrokerResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: ErrorKind,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl From<&BrokerError> for ErrorBody {
    fn from(error: &BrokerError) -> Self {
        Self {
            code: error.kind(),
            message: error.message().to_owned(),
            retryable: error.retryable(),
            retry_after_seconds: error.retry_after().map(|wait| {
                wait.as_secs() + u64::from(wait.subsec_nanos() > 0)
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub request_id: String,
    pub latency_ms: u64,
    pub attempts: u32,
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hook_failures: Vec<HookFailure>,
}

/// Vendor-neutral answer to every operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_ref: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl BrokerResponse {
    fn failed(rule_id: Option<String>, error: &BrokerError) -> Self {
        Self {
            success: false,
            rule_id,
            vendor_ref: None,
            status: String::from("failed"),
            diagnostics: None,
            error: Some(ErrorBody::from(error)),
            data: None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|error| error.code)
    }

    /// Status code an HTTP boundary should answer with.
    pub fn http_status(&self) -> u16 {
        match (&self.error, self.success) {
            (Some(error), false) => error.code.http_status(),
            _ if self.status == "created" => 201,
            _ => 200,
        }
    }
}

#[derive(Debug, Default)]
struct Trace {
    rule_id: Option<String>,
    attempts: u32,
    cached: bool,
    hook_failures: Vec<HookFailure>,
    reached_backend: bool,
}

/// Vendor-neutral entry point composing the resilience layer around the
/// dictionary engines.
#[derive(Clone)]
pub struct Broker {
    auth: AuthGate,
    limiter: SlidingWindowLimiter,
    breakers: CircuitBreakerRegistry,
    store: Arc<dyn IdempotencyStore>,
    unavailable_policy: UnavailablePolicy,
    idempotency_ttl: Duration,
    backends: BackendRegistry,
    metrics: BrokerMetrics,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("backends", &self.backends)
            .field("unavailable_policy", &self.unavailable_policy)
            .field("idempotency_ttl", &self.idempotency_ttl)
            .finish_non_exhaustive()
    }
}

impl Broker {
    pub fn builder(auth: AuthGate, backends: BackendRegistry) -> BrokerBuilder {
        BrokerBuilder::new(auth, backends)
    }

    pub fn backends(&self) -> &BackendRegistry {
        &self.backends
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub async fn create_firewall_rule(&self, authorization: Option<&str>, payload: &Value) -> BrokerResponse {
        self.handle::<FirewallRule>(Operation::CreateFirewallRule, authorization, payload)
            .await
    }

    pub async fn update_firewall_rule(&self, authorization: Option<&str>, payload: &Value) -> BrokerResponse {
        self.handle::<FirewallRule>(Operation::UpdateFirewallRule, authorization, payload)
            .await
    }

    pub async fn delete_firewall_rule(&self, authorization: Option<&str>, payload: &Value) -> BrokerResponse {
        self.handle::<RuleRef>(Operation::DeleteFirewallRule, authorization, payload)
            .await
    }

    pub async fn list_firewall_rules(&self, authorization: Option<&str>, payload: &Value) -> BrokerResponse {
        self.handle::<ListRules>(Operation::ListFirewallRules, authorization, payload)
            .await
    }

    pub async fn create_nat_rule(&self, authorization: Option<&str>, payload: &Value) -> BrokerResponse {
        self.handle::<NatRule>(Operation::CreateNatRule, authorization, payload)
            .await
    }

    pub async fn delete_nat_rule(&self, authorization: Option<&str>, payload: &Value) -> BrokerResponse {
        self.handle::<NatRuleRef>(Operation::DeleteNatRule, authorization, payload)
            .await
    }

    /// Liveness plus idempotency store reachability.
    pub async fn health(&self) -> HealthReport {
        let started = Instant::now();
        let ping = self.store.ping().await;
        let latency_ms = elapsed_ms(started);
        let (status, idempotency_store) = match ping {
            Availability::Available(()) => (
                HealthStatus::Healthy,
                StoreHealth {
                    status: String::from("connected"),
                    latency_ms,
                    error: None,
                },
            ),
            Availability::Unavailable(reason) => {
                warn!(%reason, "idempotency store unavailable");
                (
                    HealthStatus::Degraded,
                    StoreHealth {
                        status: String::from("unavailable"),
                        latency_ms,
                        error: Some(reason),
                    },
                )
            }
        };

        HealthReport {
            status,
            service: String::from("vnfbroker"),
            version: String::from(env!("CARGO_PKG_VERSION")),
            idempotency_store,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Runs the dictionary health check against one backend instance.
    pub async fn check_backend(&self, instance_id: &str) -> Result<bool, BrokerError> {
        let (instance, engine) = self.backends.resolve(instance_id)?;
        let healthy = engine.health_check(&instance.context()).await;
        if !healthy {
            warn!(instance = %instance.id, "backend health check failed");
        }
        Ok(healthy)
    }

    /// Drops idle caller windows and expired idempotency records.
    pub async fn sweep(&self) -> SweepReport {
        let idle_callers = self.limiter.sweep();
        let expired_results = match self.store.purge_expired().await {
            Availability::Available(purged) => purged,
            Availability::Unavailable(reason) => {
                warn!(%reason, "idempotency store unavailable during sweep");
                0
            }
        };
        let report = SweepReport {
            idle_callers,
            expired_results,
        };
        debug!(?report, "maintenance sweep");
        report
    }

    /// Runs [`Broker::sweep`] every `every` until the handle is aborted.
    pub fn spawn_maintenance(&self, every: Duration) -> JoinHandle<()> {
        let broker = self.clone();
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(every);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticks.tick().await;
            loop {
                ticks.tick().await;
                broker.sweep().await;
            }
        })
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            operations: self.metrics.operations(),
            circuit_breakers: self.breakers.snapshot(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    async fn handle<P: RulePayload>(
        &self,
        operation: Operation,
        authorization: Option<&str>,
        payload: &Value,
    ) -> BrokerResponse {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let span = info_span!("broker_request", operation = operation.name(), request_id = %request_id);

        let mut trace = Trace::default();
        let result = self
            .process::<P>(operation, authorization, payload, &mut trace)
            .instrument(span)
            .await;

        let (mut response, outcome) = match result {
            Ok(response) if trace.cached => (response, RequestOutcome::CacheHit),
            Ok(response) => (response, RequestOutcome::Success),
            Err(error) => {
                let outcome = if trace.reached_backend {
                    RequestOutcome::Failure
                } else {
                    RequestOutcome::Rejected
                };
                (BrokerResponse::failed(trace.rule_id.clone(), &error), outcome)
            }
        };
        self.metrics.record(operation.name(), outcome);

        response.diagnostics = Some(Diagnostics {
            request_id,
            latency_ms: elapsed_ms(started),
            attempts: trace.attempts,
            cached: trace.cached,
            hook_failures: trace.hook_failures,
        });
        response
    }

    async fn process<P: RulePayload>(
        &self,
        operation: Operation,
        authorization: Option<&str>,
        payload: &Value,
        trace: &mut Trace,
    ) -> Result<BrokerResponse, BrokerError> {
        let identity = self.auth.authorize(authorization, operation.access())?;
        self.limiter.check(&identity.subject).map_err(|wait_seconds| {
            warn!(subject = %identity.subject, wait_seconds, "rate limit exceeded");
            BrokerError::rate_limited(
                format!("rate limit exceeded for {}", identity.subject),
                Duration::from_secs(wait_seconds),
            )
        })?;

        let parsed = parse_payload::<P>(payload).map_err(|error| {
            debug!(%error, "payload rejected");
            BrokerError::from(error)
        })?;
        trace.rule_id = parsed.rule_id().map(|id| id.as_str().to_owned());
        let canonical = serde_json::to_value(&parsed)
            .map_err(|error| BrokerError::internal(format!("cannot encode payload: {error}")))?;
        let (instance, engine) = self.backends.resolve(parsed.instance_id().as_str())?;

        let key = operation
            .is_mutating()
            .then(|| operation.idempotency_key(&parsed, &canonical));
        let marker = operation
            .is_mutating()
            .then(|| operation.rule_marker(&parsed))
            .flatten();
        let mut guarded = false;
        if let Some(key) = &key {
            match self.store.lookup(key).await {
                Availability::Available(Some(hit)) => {
                    if self.is_latest(marker.as_ref(), key).await {
                        if let Some(response) = cached_response(key, hit) {
                            trace.cached = true;
                            return Ok(response);
                        }
                    } else {
                        debug!(key = %key, "cached result superseded by a later mutation");
                    }
                    guarded = true;
                }
                Availability::Available(None) => {
                    debug!(key = %key, "idempotency miss");
                    guarded = true;
                }
                Availability::Unavailable(reason) => match self.unavailable_policy {
                    UnavailablePolicy::FailOpen => {
                        warn!(%reason, "idempotency store unavailable, continuing unguarded");
                    }
                    UnavailablePolicy::FailClosed => {
                        warn!(%reason, "idempotency store unavailable, rejecting");
                        return Err(BrokerError::internal("idempotency store unavailable"));
                    }
                },
            }
        }

        if !self.breakers.allow_request(&instance.id) {
            return Err(BrokerError::backend_unavailable(format!(
                "circuit breaker open for VNF instance {}",
                instance.id
            )));
        }

        let mut context = instance.context();
        context.merge_object(&canonical);
        context.insert("operation", operation.name());

        trace.reached_backend = true;
        let outcome = match engine
            .execute(
                operation.name(),
                &context,
                ExecuteOptions {
                    idempotency_guarded: guarded,
                },
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                if error.kind().is_backend_failure() {
                    self.breakers.record_failure(&instance.id);
                } else {
                    self.breakers.release(&instance.id);
                }
                return Err(error);
            }
        };
        trace.attempts = outcome.attempts;

        if let Some(error) = outcome.error() {
            if error.kind().is_backend_failure() {
                self.breakers.record_failure(&instance.id);
            } else {
                // The appliance answered, so it is alive.
                self.breakers.record_success(&instance.id);
            }
            return Err(error);
        }
        self.breakers.record_success(&instance.id);

        let error = outcome.hook_failures.first().map(|failure| {
            ErrorBody::from(&BrokerError::upstream(format!(
                "post-operation hook '{}' failed after the rule was applied: {}",
                failure.hook, failure.message
            )))
        });
        trace.hook_failures = outcome.hook_failures.clone();

        let response = BrokerResponse {
            success: true,
            rule_id: trace.rule_id.clone(),
            vendor_ref: outcome.vendor_ref.clone(),
            status: operation.completed_status().to_owned(),
            diagnostics: None,
            error,
            data: (!operation.is_mutating()).then(|| outcome.body.clone()),
        };
        info!(instance = %instance.id, vendor_ref = ?response.vendor_ref, "operation succeeded");

        if let Some(key) = &key {
            self.remember(key, &response).await;
            if let Some(marker) = &marker {
                self.mark_latest(marker, key).await;
            }
        }
        Ok(response)
    }

    /// Whether `key` still names the last mutation applied to its rule.
    async fn is_latest(&self, marker: Option<&IdempotencyKey>, key: &IdempotencyKey) -> bool {
        let Some(marker) = marker else {
            return true;
        };
        match self.store.lookup(marker).await {
            Availability::Available(Some(latest)) => latest.payload.as_str() == Some(key.as_str()),
            Availability::Available(None) => false,
            Availability::Unavailable(reason) => {
                warn!(%reason, "cannot read rule marker, trusting cached result");
                true
            }
        }
    }

    async fn remember(&self, key: &IdempotencyKey, response: &BrokerResponse) {
        let payload = match serde_json::to_value(response) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(key = %key, %error, "cannot encode response for idempotency store");
                return;
            }
        };
        let result = CachedResult::new(payload, response.success, self.idempotency_ttl);
        if let Availability::Unavailable(reason) = self.store.store(key, result).await {
            warn!(key = %key, %reason, "failed to record idempotent result");
        }
    }

    /// Points the rule marker at `key` and forgets the mutation it replaces.
    async fn mark_latest(&self, marker: &IdempotencyKey, key: &IdempotencyKey) {
        let previous = self.store.lookup(marker).await.ok().flatten().and_then(|latest| {
            latest
                .payload
                .as_str()
                .filter(|previous| *previous != key.as_str())
                .map(IdempotencyKey::from_raw)
        });

        let record = CachedResult::new(Value::String(key.as_str().to_owned()), true, self.idempotency_ttl);
        if let Availability::Unavailable(reason) = self.store.store(marker, record).await {
            warn!(key = %marker, %reason, "failed to record rule marker");
            return;
        }
        if let Some(previous) = previous {
            if let Availability::Unavailable(reason) = self.store.remove(&previous).await {
                warn!(key = %previous, %reason, "failed to drop superseded result");
            }
        }
    }
}

/// What one [`Broker::sweep`] dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub idle_callers: usize,
    pub expired_results: usize,
}

fn cached_response(key: &IdempotencyKey, hit: CachedResult) -> Option<BrokerResponse> {
    match serde_json::from_value::<BrokerResponse>(hit.payload) {
        Ok(response) => {
            info!(key = %key, "idempotent replay");
            Some(response)
        }
        Err(error) => {
            warn!(key = %key, %error, "unreadable cached result, treating as miss");
            None
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Builder for [`Broker`].
///
/// ```rust,ignore
/// let broker = Broker::builder(auth, backends)
///     .with_config(&BrokerConfig::from_env()?)
///     .build();
/// ```
pub struct BrokerBuilder {
    auth: AuthGate,
    backends: BackendRegistry,
    store: Option<Arc<dyn IdempotencyStore>>,
    rate_limit: RateLimitConfig,
    circuit_breaker: CircuitBreakerConfig,
    unavailable_policy: UnavailablePolicy,
    idempotency_ttl: Duration,
}

impl BrokerBuilder {
    pub fn new(auth: AuthGate, backends: BackendRegistry) -> Self {
        Self {
            auth,
            backends,
            store: None,
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            unavailable_policy: UnavailablePolicy::default(),
            idempotency_ttl: DEFAULT_TTL,
        }
    }

    /// Applies the rate limit, circuit breaker and idempotency sections.
    pub fn with_config(mut self, config: &BrokerConfig) -> Self {
        self.rate_limit = config.rate_limit;
        self.circuit_breaker = config.circuit_breaker;
        self.unavailable_policy = config.idempotency.unavailable_policy;
        self.idempotency_ttl = config.idempotency.ttl();
        self
    }

    pub fn with_store(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Connects the Redis store when `idempotency.redis_url` is configured.
    #[cfg(feature = "redis")]
    pub async fn with_configured_store(
        self,
        config: &crate::config::IdempotencyConfig,
    ) -> Result<Self, redis::RedisError> {
        match &config.redis_url {
            Some(url) => {
                let store = crate::idempotency::RedisIdempotencyStore::connect(url).await?;
                Ok(self.with_store(Arc::new(store)))
            }
            None => Ok(self),
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    pub fn with_unavailable_policy(mut self, policy: UnavailablePolicy) -> Self {
        self.unavailable_policy = policy;
        self
    }

    pub fn with_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.idempotency_ttl = ttl;
        self
    }

    pub fn build(self) -> Broker {
        Broker {
            auth: self.auth,
            limiter: SlidingWindowLimiter::new(self.rate_limit),
            breakers: CircuitBreakerRegistry::new(self.circuit_breaker),
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryIdempotencyStore::new())),
            unavailable_policy: self.unavailable_policy,
            idempotency_ttl: self.idempotency_ttl,
            backends: self.backends,
            metrics: BrokerMetrics::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn operation_names_match_dictionary_keys() {
        assert_eq!(Operation::CreateFirewallRule.name(), "create_firewall_rule");
        assert_eq!(Operation::DeleteNatRule.name(), "delete_nat_rule");
        assert!(!Operation::ListFirewallRules.is_mutating());
        assert_eq!(Operation::ListFirewallRules.access(), Access::Read);
        assert_eq!(Operation::UpdateFirewallRule.access(), Access::Write);
        assert_eq!(Operation::DeleteNatRule.family(), "nat");
        assert_eq!(Operation::UpdateFirewallRule.family(), "firewall");
    }

    #[test]
    fn create_keys_use_instance_and_rule_id() {
        let rule: FirewallRule = parse_payload(&json!({
            "vnfInstanceId": "vnf-1",
            "ruleId": "fw-1",
            "action": "allow",
            "protocol": "tcp",
            "sourceIp": "any",
            "destinationIp": "any"
        }))
        .unwrap();
        let canonical = serde_json::to_value(&rule).unwrap();

        let create = Operation::CreateFirewallRule.idempotency_key(&rule, &canonical);
        let update = Operation::UpdateFirewallRule.idempotency_key(&rule, &canonical);

        assert_eq!(create.as_str(), "idem:create_firewall_rule:vnf-1:fw-1");
        assert!(update.as_str().starts_with("idem:update_firewall_rule:vnf-1:fw-1:"));
        assert_eq!(
            Operation::DeleteFirewallRule.rule_marker(&rule).map(|key| key.as_str().to_owned()),
            Some(String::from("idem:latest:firewall:vnf-1:fw-1"))
        );
    }

    #[test]
    fn error_body_rounds_retry_after_up() {
        let error = BrokerError::rate_limited("slow down", Duration::from_millis(1_200));
        let body = ErrorBody::from(&error);

        assert_eq!(body.code, ErrorKind::RateLimitExceeded);
        assert_eq!(body.retry_after_seconds, Some(2));
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["code"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(value["retryAfterSeconds"], 2);
    }

    #[test]
    fn response_serializes_camel_case_and_skips_empty_fields() {
        let response = BrokerResponse {
            success: true,
            rule_id: Some(String::from("fw-1")),
            vendor_ref: Some(String::from("42")),
            status: String::from("created"),
            diagnostics: None,
            error: None,
            data: None,
        };

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value, json!({"success": true, "ruleId": "fw-1", "vendorRef": "42", "status": "created"}));
        assert_eq!(response.http_status(), 201);
    }
}
