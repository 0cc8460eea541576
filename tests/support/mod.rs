//! Shared fixtures for the behavior tests: signed tokens, the pfSense
//! dictionary and a broker wired to a scripted transport.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use time::OffsetDateTime;
use vnfbroker_core::{
    Availability, AuthGate, Backoff, BackendInstance, BackendRegistry, Broker, BrokerBuilder,
    CachedResult, IdempotencyKey, IdempotencyStore, MockHttpClient, VendorDictionary,
};
use vnfbroker_core::idempotency::StoreFuture;

pub const PUBLIC_KEY: &str = include_str!("../fixtures/jwt_public.pem");
pub const PRIVATE_KEY: &str = include_str!("../fixtures/jwt_private.pem");
pub const OTHER_PRIVATE_KEY: &str = include_str!("../fixtures/jwt_other_private.pem");
pub const PFSENSE_DICTIONARY: &str = include_str!("../../dictionaries/pfsense.yaml");

pub const INSTANCE: &str = "vnf-edge-1";
pub const OK_BODY: &str = r#"{"status":"ok","code":200,"message":"Rule created successfully","data":{"id":"fw-1"}}"#;

pub fn token_signed_with(private_pem: &str, subject: &str, scope: &str, expires_in: i64) -> String {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let claims = json!({"sub": subject, "scope": scope, "iat": now, "exp": now + expires_in});
    let key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("fixture key parses");
    encode(&Header::new(Algorithm::RS256), &claims, &key).expect("token encodes")
}

pub fn bearer(scope: &str) -> String {
    bearer_for("orchestrator", scope)
}

pub fn bearer_for(subject: &str, scope: &str) -> String {
    format!("Bearer {}", token_signed_with(PRIVATE_KEY, subject, scope, 300))
}

pub fn firewall_payload() -> Value {
    json!({
        "vnfInstanceId": INSTANCE,
        "ruleId": "fw-1",
        "action": "allow",
        "protocol": "tcp",
        "sourceIp": "10.0.0.0/24",
        "destinationIp": "192.168.1.0/24",
        "destinationPort": 443
    })
}

pub fn nat_payload() -> Value {
    json!({
        "vnfInstanceId": INSTANCE,
        "ruleId": "nat-1",
        "natType": "snat",
        "originalIp": "10.0.0.0/24",
        "translatedIp": "203.0.113.10"
    })
}

pub fn pfsense() -> VendorDictionary {
    VendorDictionary::from_yaml_str(PFSENSE_DICTIONARY).expect("pfSense dictionary loads")
}

/// Broker plus the transport it talks to.
pub struct Harness {
    pub broker: Broker,
    pub mock: Arc<MockHttpClient>,
}

impl Harness {
    /// Requests whose URL contains `fragment`, i.e. primary calls for one
    /// endpoint without the apply hook.
    pub fn calls_to(&self, method: &str, fragment: &str) -> usize {
        self.mock
            .requests()
            .iter()
            .filter(|request| request.method.as_str() == method && request.url.contains(fragment))
            .count()
    }
}

pub fn harness() -> Harness {
    harness_with(|builder| builder)
}

pub fn harness_with(configure: impl FnOnce(BrokerBuilder) -> BrokerBuilder) -> Harness {
    let mock = Arc::new(MockHttpClient::new());
    mock.set_fallback(201, OK_BODY);

    let backends = BackendRegistry::new(mock.clone())
        .with_backoff(Backoff::Fixed { delay: Duration::from_millis(1) });
    backends.replace_dictionary("pfsense", pfsense());
    backends.register_instance(
        BackendInstance::new(INSTANCE, "pfsense")
            .with_variable("vnf_host", "10.10.0.1")
            .with_variable("credentials", json!({"username": "admin", "password": "pfsense"})),
    );

    let auth = AuthGate::from_rsa_pem(PUBLIC_KEY.as_bytes()).expect("fixture public key parses");
    let broker = configure(Broker::builder(auth, backends)).build();
    Harness { broker, mock }
}

/// Store whose backend is permanently unreachable.
#[derive(Debug, Default)]
pub struct DownStore;

impl IdempotencyStore for DownStore {
    fn lookup<'a>(&'a self, _key: &'a IdempotencyKey) -> StoreFuture<'a, Option<CachedResult>> {
        Box::pin(async { Availability::Unavailable(String::from("connection refused")) })
    }

    fn store<'a>(&'a self, _key: &'a IdempotencyKey, _result: CachedResult) -> StoreFuture<'a, ()> {
        Box::pin(async { Availability::Unavailable(String::from("connection refused")) })
    }

    fn remove<'a>(&'a self, _key: &'a IdempotencyKey) -> StoreFuture<'a, ()> {
        Box::pin(async { Availability::Unavailable(String::from("connection refused")) })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Availability::Unavailable(String::from("connection refused")) })
    }
}
