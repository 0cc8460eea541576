//! Bounded retry policy for vendor calls: exponential backoff with jitter.

use std::time::Duration;

use crate::http_client::{HttpError, HttpErrorKind, HttpMethod, HttpResponse};

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed {
        delay: Duration,
    },
    /// `base * factor^attempt`, capped at `max`, optionally jittered by +/- 50%.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(200),
            factor: 2.0,
            max: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let seconds = (base.as_secs_f64() * factor.powi(exponent)).min(max.as_secs_f64());
                let delay = Duration::from_secs_f64(seconds);
                if !jitter {
                    return delay;
                }

                let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                let spread = millis / 2;
                let offset = fastrand::u64(0..=spread.saturating_mul(2));
                Duration::from_millis((millis - spread).saturating_add(offset))
            }
        }
    }
}

/// Why a failed attempt may be repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCause {
    Timeout,
    Connect,
    Status(u16),
}

/// Retry budget derived from a vendor dictionary's `retry_attempts`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one; never below 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub retry_on_status: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            retry_on_status: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    pub fn no_retry() -> Self {
        Self::with_attempts(1)
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Classifies an attempt outcome. `None` means the outcome is final.
    pub fn retry_cause(&self, outcome: &Result<HttpResponse, HttpError>) -> Option<RetryCause> {
        match outcome {
            Ok(response) if self.retry_on_status.contains(&response.status) => {
                Some(RetryCause::Status(response.status))
            }
            Ok(_) => None,
            Err(error) => match error.kind() {
                HttpErrorKind::Timeout => Some(RetryCause::Timeout),
                HttpErrorKind::Connect => Some(RetryCause::Connect),
                HttpErrorKind::Other => None,
            },
        }
    }

    /// Repeating a call is only safe when the method is idempotent or the
    /// caller deduplicates the request itself.
    pub fn permits_retry(method: HttpMethod, idempotency_guarded: bool) -> bool {
        method.is_idempotent() || idempotency_guarded
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}
