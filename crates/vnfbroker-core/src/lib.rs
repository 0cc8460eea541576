//! # vnfbroker Core
//!
//! Dictionary-driven protocol translation between an orchestration plane and
//! vendor VNF appliances (firewalls, NAT gateways).
//!
//! ## Overview
//!
//! Callers submit vendor-neutral intents such as "create firewall rule". The
//! broker renders the vendor-specific REST call from a declarative YAML
//! dictionary and wraps every call in a resilience layer:
//!
//! - **Vendor dictionaries** describing endpoints, bodies, auth, response
//!   mapping and post-operation hooks, validated at load
//! - **Dictionary engine** executing operations with timeouts, bounded retries
//!   and an optional outbound quota per vendor
//! - **Idempotency store** so a repeated intent never reaches the appliance
//!   twice
//! - **Circuit breakers** per backend instance
//! - **Sliding-window rate limiting** per caller
//! - **RS256 bearer token auth** with read/write scopes
//!
//! ## Feature Flags
//!
//! | Flag | Description |
//! |------|-------------|
//! | `default` | In-memory idempotency store |
//! | `redis` | [`RedisIdempotencyStore`](idempotency::RedisIdempotencyStore) shared across broker replicas |
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`auth`] | Bearer token verification and scopes |
//! | [`backend`] | VNF instance and dictionary registry |
//! | [`broker`] | Request orchestration and response shape |
//! | [`circuit_breaker`] | Per-backend circuit breakers |
//! | [`config`] | Configuration with environment overlay |
//! | [`context`] | Template rendering environment |
//! | [`dictionary`] | Vendor dictionary model and loading |
//! | [`domain`] | Validated rule payloads |
//! | [`engine`] | Dictionary execution |
//! | [`error`] | Canonical error kinds |
//! | [`expr`] | Field paths and success expressions |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`idempotency`] | Idempotency keys and stores |
//! | [`metrics`] | Counters and health report |
//! | [`rate_limiter`] | Caller rate limiting |
//! | [`retry`] | Retry policy and backoff |
//! | [`telemetry`] | Tracing subscriber setup |
//! | [`template`] | `{{ placeholder }}` templates |
//! | [`throttling`] | Outbound vendor quota |
//! | [`validator`] | Supported vendors and version compatibility |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use vnfbroker_core::{
//!     AuthGate, BackendInstance, BackendRegistry, Broker, BrokerConfig, DictionaryValidator,
//!     ReqwestHttpClient,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BrokerConfig::from_env()?;
//!     vnfbroker_core::telemetry::init_tracing(&config.logging);
//!
//!     let backends = BackendRegistry::new(Arc::new(ReqwestHttpClient::new()))
//!         .with_hook_mode(config.engine.hook_mode);
//!     let validator = DictionaryValidator::from_config(&config.engine, env!("CARGO_PKG_VERSION"));
//!     backends.load_dictionary("pfsense", "dictionaries/pfsense.yaml", &validator)?;
//!     backends.register_instance(
//!         BackendInstance::new("vnf-edge-1", "pfsense").with_variable("vnf_host", "10.0.0.1"),
//!     );
//!
//!     let broker = Broker::builder(AuthGate::from_config(&config.auth)?, backends)
//!         .with_config(&config)
//!         .build();
//!     let _maintenance = broker.spawn_maintenance(Duration::from_secs(60));
//!
//!     let response = broker
//!         .create_firewall_rule(Some("Bearer <token>"), &serde_json::json!({
//!             "vnfInstanceId": "vnf-edge-1",
//!             "ruleId": "fw-1",
//!             "action": "allow",
//!             "protocol": "tcp",
//!             "sourceIp": "10.0.0.0/24",
//!             "destinationIp": "192.168.1.0/24",
//!             "destinationPort": 443
//!         }))
//!         .await;
//!     println!("{}", serde_json::to_string_pretty(&response)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Orchestrator   │
//! └────────┬────────┘
//!          │ Authorization + JSON payload
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │     Broker      │────▶│ Auth / Rate Limit│
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ├─────────────▶ Idempotency Store
//!          ├─────────────▶ Circuit Breakers
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Dictionary      │────▶│ HTTP Client      │
//! │ Engine          │     │ (reqwest/mock)   │
//! └─────────────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ VNF appliance   │
//! └─────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Every operation answers with a [`BrokerResponse`]. Failures carry a
//! canonical [`ErrorKind`]:
//!
//! ```rust
//! use vnfbroker_core::{BrokerResponse, ErrorKind};
//!
//! fn handle(response: &BrokerResponse) {
//!     match response.error_kind() {
//!         Some(ErrorKind::RateLimitExceeded) => {
//!             // Back off for retryAfterSeconds
//!         }
//!         Some(ErrorKind::BackendUnavailable) => {
//!             // Circuit open, try later
//!         }
//!         Some(ErrorKind::ValidationError) => {
//!             // Fix the payload
//!         }
//!         _ => {}
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - Vendor credentials live in backend variables and are never logged
//! - Tokens are verified against a configured RSA public key
//! - Payloads are validated before any backend is contacted

pub mod auth;
pub mod backend;
pub mod broker;
pub mod circuit_breaker;
pub mod config;
pub mod context;
pub mod dictionary;
pub mod domain;
pub mod engine;
pub mod error;
pub mod expr;
pub mod http_client;
pub mod idempotency;
pub mod metrics;
pub mod rate_limiter;
pub mod retry;
pub mod telemetry;
pub mod template;
pub mod throttling;
pub mod validator;

// Re-export commonly used types at crate root for convenience

// Auth
pub use auth::{Access, AuthConfig, AuthConfigError, AuthGate, Identity};

// Backends
pub use backend::{BackendInstance, BackendRegistry, RegistryError};

// Broker
pub use broker::{
    Broker, BrokerBuilder, BrokerResponse, Diagnostics, ErrorBody, Operation,
    SweepReport,
};

// Circuit breaker
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitSnapshot, CircuitState,
};

// Configuration
pub use config::{BrokerConfig, ConfigError, EngineConfig, IdempotencyConfig, LogFormat, LoggingConfig};

// Dictionaries
pub use context::ExecutionContext;
pub use dictionary::{DictionaryError, OperationSpec, OperationVariants, VendorDictionary};
pub use validator::{DictionaryValidator, ValidationReport};

// Domain models
pub use domain::{
    Address, FirewallAction, FirewallRule, InstanceId, ListRules, NatRule, NatRuleRef, NatType,
    Port, Protocol, RuleId, RuleRef,
};

// Engine
pub use engine::{DictionaryEngine, ExecuteOptions, HookMode, OperationOutcome};

// Error types
pub use error::{BrokerError, ErrorKind, ValidationError};

// HTTP client types
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, MockHttpClient,
    ReqwestHttpClient,
};

// Idempotency
pub use idempotency::{
    Availability, CachedResult, IdempotencyKey, IdempotencyStore, MemoryIdempotencyStore,
    UnavailablePolicy,
};

// Metrics
pub use metrics::{HealthReport, HealthStatus, MetricsSnapshot};

// Rate limiting
pub use rate_limiter::{RateLimitConfig, SlidingWindowLimiter};

// Retry logic
pub use retry::{Backoff, RetryPolicy};
