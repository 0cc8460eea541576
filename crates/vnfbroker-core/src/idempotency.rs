//! Content-addressed cache of successful mutating operations.
//!
//! A repeated request with the same logical intent is answered from here
//! instead of being replayed against the appliance. The store is an
//! optimisation over the appliance's own state, never the source of truth, so
//! outages surface as [`Availability::Unavailable`] and the orchestrator
//! decides whether to continue without it.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// Default lifetime of a cached result.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Cache key derived from the canonical form of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// `idem:{operation}:{sha256}` over the canonical payload minus `ruleId`.
    pub fn from_payload(operation: &str, payload: &Value) -> Self {
        Self(format!("idem:{operation}:{}", digest_without_rule_id(payload)))
    }

    /// Creates that name their own rule id are keyed by instance and id.
    pub fn for_client_rule(operation: &str, instance: &str, rule_id: &str) -> Self {
        Self(format!("idem:{operation}:{instance}:{rule_id}"))
    }

    /// Updates and deletes target one rule; the digest separates different
    /// intents against the same rule.
    pub fn scoped_to_rule(operation: &str, instance: &str, rule_id: &str, payload: &Value) -> Self {
        Self(format!(
            "idem:{operation}:{instance}:{rule_id}:{}",
            digest_without_rule_id(payload)
        ))
    }

    /// Record naming the last mutation applied to one rule. A cached result
    /// is only replayed while it is still that mutation.
    pub fn latest_for_rule(family: &str, instance: &str, rule_id: &str) -> Self {
        Self(format!("idem:latest:{family}:{instance}:{rule_id}"))
    }

    /// Rebuilds a key read back from a store record.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for IdempotencyKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn digest_without_rule_id(payload: &Value) -> String {
    let stripped = match payload {
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .filter(|(key, _)| key.as_str() != "ruleId")
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ),
        other => other.clone(),
    };
    let mut canonical = String::new();
    write_canonical(&stripped, &mut canonical);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Compact JSON with object keys sorted at every depth.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(fields) => {
            let mut keys = fields.keys().collect::<Vec<_>>();
            keys.sort();
            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&fields[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Stored response of a successful execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    pub payload: Value,
    pub success: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub stored_at: OffsetDateTime,
    pub ttl_seconds: u64,
}

impl CachedResult {
    pub fn new(payload: Value, success: bool, ttl: Duration) -> Self {
        Self {
            payload,
            success,
            stored_at: OffsetDateTime::now_utc(),
            ttl_seconds: ttl.as_secs(),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Result of a store operation that may fail because the store is down.
#[derive(Debug, Clone, PartialEq)]
pub enum Availability<T> {
    Available(T),
    Unavailable(String),
}

impl<T> Availability<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Self::Available(value) => Some(value),
            Self::Unavailable(_) => None,
        }
    }
}

/// What the broker does when the store cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailablePolicy {
    /// Treat as a miss and continue without deduplication.
    #[default]
    FailOpen,
    /// Reject the request.
    FailClosed,
}

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Availability<T>> + Send + 'a>>;

/// Storage contract for idempotency records. Concurrent writers race with
/// last-write-wins semantics.
pub trait IdempotencyStore: Send + Sync {
    fn lookup<'a>(&'a self, key: &'a IdempotencyKey) -> StoreFuture<'a, Option<CachedResult>>;

    fn store<'a>(&'a self, key: &'a IdempotencyKey, result: CachedResult) -> StoreFuture<'a, ()>;

    fn remove<'a>(&'a self, key: &'a IdempotencyKey) -> StoreFuture<'a, ()>;

    fn ping(&self) -> StoreFuture<'_, ()>;

    /// Drops expired records and reports how many went. Stores that expire
    /// records themselves keep the default.
    fn purge_expired(&self) -> StoreFuture<'_, usize> {
        Box::pin(async { Availability::Available(0) })
    }
}

#[derive(Debug, Clone)]
struct Entry {
    result: CachedResult,
    expires_at: Instant,
}

/// Process-local store. Expired entries are invisible to reads and dropped by
/// [`MemoryIdempotencyStore::clear_expired`].
#[derive(Debug, Clone, Default)]
pub struct MemoryIdempotencyStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn clear_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl IdempotencyStore for MemoryIdempotencyStore {
    fn lookup<'a>(&'a self, key: &'a IdempotencyKey) -> StoreFuture<'a, Option<CachedResult>> {
        Box::pin(async move {
            let entries = self.entries.read().await;
            let hit = entries
                .get(key.as_str())
                .filter(|entry| Instant::now() < entry.expires_at)
                .map(|entry| entry.result.clone());
            Availability::Available(hit)
        })
    }

    fn store<'a>(&'a self, key: &'a IdempotencyKey, result: CachedResult) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let expires_at = Instant::now() + result.ttl();
            self.entries
                .write()
                .await
                .insert(key.as_str().to_owned(), Entry { result, expires_at });
            Availability::Available(())
        })
    }

    fn remove<'a>(&'a self, key: &'a IdempotencyKey) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.entries.write().await.remove(key.as_str());
            Availability::Available(())
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Availability::Available(()) })
    }

    fn purge_expired(&self) -> StoreFuture<'_, usize> {
        Box::pin(async move { Availability::Available(self.clear_expired().await) })
    }
}

#[cfg(feature = "redis")]
pub use redis_store::RedisIdempotencyStore;

#[cfg(feature = "redis")]
mod redis_store {
    use redis::aio::ConnectionManager;

    use super::{Availability, CachedResult, IdempotencyKey, IdempotencyStore, StoreFuture};

    /// Shared store backed by Redis `SET EX` / `GET` / `DEL`. Redis expires
    /// records on its own.
    #[derive(Clone)]
    pub struct RedisIdempotencyStore {
        connection: ConnectionManager,
    }

    impl std::fmt::Debug for RedisIdempotencyStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RedisIdempotencyStore").finish_non_exhaustive()
        }
    }

    impl RedisIdempotencyStore {
        pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
            let client = redis::Client::open(url)?;
            let connection = ConnectionManager::new(client).await?;
            Ok(Self { connection })
        }
    }

    impl IdempotencyStore for RedisIdempotencyStore {
        fn lookup<'a>(&'a self, key: &'a IdempotencyKey) -> StoreFuture<'a, Option<CachedResult>> {
            Box::pin(async move {
                let mut connection = self.connection.clone();
                let raw: Result<Option<String>, _> = redis::cmd("GET")
                    .arg(key.as_str())
                    .query_async(&mut connection)
                    .await;
                match raw {
                    Ok(None) => Availability::Available(None),
                    // A record we cannot decode is treated like a miss.
                    Ok(Some(json)) => Availability::Available(serde_json::from_str(&json).ok()),
                    Err(error) => Availability::Unavailable(error.to_string()),
                }
            })
        }

        fn store<'a>(&'a self, key: &'a IdempotencyKey, result: CachedResult) -> StoreFuture<'a, ()> {
            Box::pin(async move {
                let json = match serde_json::to_string(&result) {
                    Ok(json) => json,
                    Err(error) => return Availability::Unavailable(error.to_string()),
                };
                let mut connection = self.connection.clone();
                let written: Result<(), _> = redis::cmd("SET")
                    .arg(key.as_str())
                    .arg(json)
                    .arg("EX")
                    .arg(result.ttl_seconds.max(1))
                    .query_async(&mut connection)
                    .await;
                match written {
                    Ok(()) => Availability::Available(()),
                    Err(error) => Availability::Unavailable(error.to_string()),
                }
            })
        }

        fn remove<'a>(&'a self, key: &'a IdempotencyKey) -> StoreFuture<'a, ()> {
            Box::pin(async move {
                let mut connection = self.connection.clone();
                let deleted: Result<u64, _> = redis::cmd("DEL")
                    .arg(key.as_str())
                    .query_async(&mut connection)
                    .await;
                match deleted {
                    Ok(_) => Availability::Available(()),
                    Err(error) => Availability::Unavailable(error.to_string()),
                }
            })
        }

        fn ping(&self) -> StoreFuture<'_, ()> {
            Box::pin(async move {
                let mut connection = self.connection.clone();
                let pong: Result<String, _> = redis::cmd("PING").query_async(&mut connection).await;
                match pong {
                    Ok(_) => Availability::Available(()),
                    Err(error) => Availability::Unavailable(error.to_string()),
                }
            })
        }
    }
}
