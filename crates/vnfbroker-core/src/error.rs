use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical error classification shared by every vendor and every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Unauthenticated,
    Forbidden,
    ValidationError,
    RateLimitExceeded,
    BackendUnavailable,
    UpstreamTimeout,
    UpstreamUnreachable,
    UpstreamError,
    OperationNotFound,
    InternalError,
}

impl ErrorKind {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Forbidden => "FORBIDDEN",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::BackendUnavailable => "BACKEND_UNAVAILABLE",
            Self::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            Self::UpstreamUnreachable => "UPSTREAM_UNREACHABLE",
            Self::UpstreamError => "UPSTREAM_ERROR",
            Self::OperationNotFound => "OPERATION_NOT_FOUND",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Status code an HTTP boundary should answer with for this kind.
    pub const fn http_status(self) -> u16 {
        match self {
            Self::Unauthenticated => 401,
            Self::Forbidden => 403,
            Self::ValidationError => 400,
            Self::RateLimitExceeded => 429,
            Self::BackendUnavailable => 503,
            Self::UpstreamTimeout => 504,
            Self::UpstreamUnreachable | Self::UpstreamError => 502,
            Self::OperationNotFound => 501,
            Self::InternalError => 500,
        }
    }

    /// Kinds produced by a backend that actually misbehaved. Only these count
    /// against a circuit breaker.
    pub const fn is_backend_failure(self) -> bool {
        matches!(
            self,
            Self::UpstreamTimeout | Self::UpstreamUnreachable | Self::UpstreamError
        )
    }

    pub fn parse(value: &str) -> Option<Self> {
        let kind = match value.trim().to_ascii_uppercase().as_str() {
            "UNAUTHENTICATED" => Self::Unauthenticated,
            "FORBIDDEN" => Self::Forbidden,
            "VALIDATION_ERROR" => Self::ValidationError,
            "RATE_LIMIT_EXCEEDED" => Self::RateLimitExceeded,
            "BACKEND_UNAVAILABLE" => Self::BackendUnavailable,
            "UPSTREAM_TIMEOUT" => Self::UpstreamTimeout,
            "UPSTREAM_UNREACHABLE" => Self::UpstreamUnreachable,
            "UPSTREAM_ERROR" => Self::UpstreamError,
            "OPERATION_NOT_FOUND" => Self::OperationNotFound,
            "INTERNAL_ERROR" => Self::InternalError,
            _ => return None,
        };
        Some(kind)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Structured request-path error returned to callers of the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerError {
    kind: ErrorKind,
    message: String,
    retryable: bool,
    retry_after: Option<Duration>,
}

impl BrokerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: matches!(
                kind,
                ErrorKind::UpstreamTimeout | ErrorKind::UpstreamUnreachable
            ),
            retry_after: None,
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Duration) -> Self {
        Self {
            retryable: true,
            retry_after: Some(retry_after),
            ..Self::new(ErrorKind::RateLimitExceeded, message)
        }
    }

    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            ..Self::new(ErrorKind::BackendUnavailable, message)
        }
    }

    pub fn upstream_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamTimeout, message)
    }

    pub fn upstream_unreachable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamUnreachable, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamError, message)
    }

    pub fn operation_not_found(operation: &str) -> Self {
        Self::new(
            ErrorKind::OperationNotFound,
            format!("operation '{operation}' is not defined in the vendor dictionary"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }
}

impl Display for BrokerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for BrokerError {}

impl From<ValidationError> for BrokerError {
    fn from(value: ValidationError) -> Self {
        Self::validation(value.to_string())
    }
}

/// Payload validation failures raised before any backend is contacted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("payload must be a JSON object")]
    NotAnObject,
    #[error("invalid payload: {0}")]
    Malformed(String),

    #[error("field '{field}' cannot be empty")]
    EmptyField { field: &'static str },
    #[error("field '{field}' length {len} exceeds max {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
    #[error("field '{field}' contains invalid character '{ch}' at index {index}")]
    InvalidChar {
        field: &'static str,
        ch: char,
        index: usize,
    },

    #[error("field '{field}' must be an IP address, CIDR block, or 'any': '{value}'")]
    InvalidAddress { field: &'static str, value: String },
    #[error("field '{field}' must be a port between 1 and 65535: {value}")]
    InvalidPort { field: &'static str, value: u64 },
}
