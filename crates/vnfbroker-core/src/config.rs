//! Runtime configuration for the broker.
//!
//! Defaults suit a single-node deployment. [`BrokerConfig::from_env`] overlays
//! `VNFBROKER_*` environment variables on top of them:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `VNFBROKER_RATE_LIMIT_REQUESTS` | `rate_limit.limit` |
//! | `VNFBROKER_RATE_LIMIT_WINDOW_SECONDS` | `rate_limit.window_seconds` |
//! | `VNFBROKER_CIRCUIT_FAILURE_THRESHOLD` | `circuit_breaker.failure_threshold` |
//! | `VNFBROKER_CIRCUIT_SUCCESS_THRESHOLD` | `circuit_breaker.success_threshold` |
//! | `VNFBROKER_CIRCUIT_OPEN_TIMEOUT_SECONDS` | `circuit_breaker.open_timeout` |
//! | `VNFBROKER_IDEMPOTENCY_TTL_SECONDS` | `idempotency.ttl_seconds` |
//! | `VNFBROKER_IDEMPOTENCY_POLICY` | `idempotency.unavailable_policy` (`fail_open`, `fail_closed`) |
//! | `VNFBROKER_REDIS_URL` | `idempotency.redis_url` |
//! | `VNFBROKER_JWT_PUBLIC_KEY_PATH` | `auth.public_key_path` |
//! | `VNFBROKER_JWT_ISSUER` | `auth.issuer` |
//! | `VNFBROKER_JWT_AUDIENCE` | `auth.audience` |
//! | `VNFBROKER_HOOK_MODE` | `engine.hook_mode` (`inline`, `detached`) |
//! | `VNFBROKER_DEV_MODE` | `engine.dev_mode` |
//! | `VNFBROKER_LOG_LEVEL` | `logging.level` |
//! | `VNFBROKER_LOG_FORMAT` | `logging.format` (`plain`, `json`) |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::AuthConfig;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::engine::HookMode;
use crate::idempotency::{UnavailablePolicy, DEFAULT_TTL};
use crate::rate_limiter::RateLimitConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {variable}: {reason}")]
    Invalid {
        variable: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    pub ttl_seconds: u64,
    pub unavailable_policy: UnavailablePolicy,
    /// Shared Redis store; the in-memory store is used when unset.
    pub redis_url: Option<String>,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_TTL.as_secs(),
            unavailable_policy: UnavailablePolicy::default(),
            redis_url: None,
        }
    }
}

impl IdempotencyConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub hook_mode: HookMode,
    /// Accept dictionaries for vendors outside the supported list.
    pub dev_mode: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `vnfbroker_core=debug`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub idempotency: IdempotencyConfig,
    pub auth: AuthConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

impl BrokerConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &'static str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .map(|value| (name, value))
        };
        let mut config = Self::default();

        if let Some(raw) = var("VNFBROKER_RATE_LIMIT_REQUESTS") {
            config.rate_limit.limit = parse(raw)?;
        }
        if let Some(raw) = var("VNFBROKER_RATE_LIMIT_WINDOW_SECONDS") {
            config.rate_limit.window_seconds = parse(raw)?;
        }
        if let Some(raw) = var("VNFBROKER_CIRCUIT_FAILURE_THRESHOLD") {
            config.circuit_breaker.failure_threshold = parse(raw)?;
        }
        if let Some(raw) = var("VNFBROKER_CIRCUIT_SUCCESS_THRESHOLD") {
            config.circuit_breaker.success_threshold = parse(raw)?;
        }
        if let Some(raw) = var("VNFBROKER_CIRCUIT_OPEN_TIMEOUT_SECONDS") {
            config.circuit_breaker.open_timeout = Duration::from_secs(parse(raw)?);
        }
        if let Some(raw) = var("VNFBROKER_IDEMPOTENCY_TTL_SECONDS") {
            config.idempotency.ttl_seconds = parse(raw)?;
        }
        if let Some((variable, value)) = var("VNFBROKER_IDEMPOTENCY_POLICY") {
            config.idempotency.unavailable_policy = match value.as_str() {
                "fail_open" => UnavailablePolicy::FailOpen,
                "fail_closed" => UnavailablePolicy::FailClosed,
                _ => return Err(invalid(variable, value, "expected fail_open or fail_closed")),
            };
        }
        if let Some((_, value)) = var("VNFBROKER_REDIS_URL") {
            config.idempotency.redis_url = Some(value);
        }
        if let Some((_, value)) = var("VNFBROKER_JWT_PUBLIC_KEY_PATH") {
            config.auth.public_key_path = Some(PathBuf::from(value));
        }
        if let Some((_, value)) = var("VNFBROKER_JWT_ISSUER") {
            config.auth.issuer = Some(value);
        }
        if let Some((_, value)) = var("VNFBROKER_JWT_AUDIENCE") {
            config.auth.audience = Some(value);
        }
        if let Some((variable, value)) = var("VNFBROKER_HOOK_MODE") {
            config.engine.hook_mode = match value.as_str() {
                "inline" => HookMode::Inline,
                "detached" => HookMode::Detached,
                _ => return Err(invalid(variable, value, "expected inline or detached")),
            };
        }
        if let Some((variable, value)) = var("VNFBROKER_DEV_MODE") {
            config.engine.dev_mode = parse_flag(variable, value)?;
        }
        if let Some((_, value)) = var("VNFBROKER_LOG_LEVEL") {
            config.logging.level = value;
        }
        if let Some((variable, value)) = var("VNFBROKER_LOG_FORMAT") {
            config.logging.format = match value.as_str() {
                "plain" => LogFormat::Plain,
                "json" => LogFormat::Json,
                _ => return Err(invalid(variable, value, "expected plain or json")),
            };
        }

        Ok(config)
    }
}

fn parse<T>((variable, value): (&'static str, String)) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|error: T::Err| invalid(variable, value.clone(), error.to_string()))
}

fn parse_flag(variable: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(variable, value, "expected a boolean")),
    }
}

fn invalid(variable: &'static str, value: String, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        variable,
        value,
        reason: reason.into(),
    }
}
