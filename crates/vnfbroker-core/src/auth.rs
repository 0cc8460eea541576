//! Bearer token gate in front of every broker operation.
//!
//! Tokens are RS256 JWTs signed by the orchestrator's identity provider. The
//! gate verifies the signature against a configured public key, checks expiry
//! and the optional issuer/audience, and turns the `scope` claim into an
//! [`Access`] level.

use std::fmt;
use std::path::{Path, PathBuf};

use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::error::BrokerError;

/// Scope granting read and write access.
pub const SCOPE_READ_WRITE: &str = "vnf:rw";
/// Scope granting read access.
pub const SCOPE_READ: &str = "vnf:r";

/// Access level an operation needs, ordered so that `Write` covers `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Access {
    Read,
    Write,
}

impl Access {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

/// Verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
    pub scopes: Vec<String>,
}

impl Identity {
    /// Highest access granted by the token's vnf scopes.
    pub fn access(&self) -> Option<Access> {
        if self.scopes.iter().any(|scope| scope == SCOPE_READ_WRITE) {
            Some(Access::Write)
        } else if self.scopes.iter().any(|scope| scope == SCOPE_READ) {
            Some(Access::Read)
        } else {
            None
        }
    }

    pub fn allows(&self, required: Access) -> bool {
        self.access().is_some_and(|granted| granted >= required)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScopeClaim {
    Delimited(String),
    List(Vec<String>),
}

impl ScopeClaim {
    fn into_scopes(self) -> Vec<String> {
        match self {
            Self::Delimited(text) => text.split_whitespace().map(str::to_owned).collect(),
            Self::List(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    scope: Option<ScopeClaim>,
}

/// Token verification settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// PEM file holding the RSA public key.
    pub public_key_path: Option<PathBuf>,
    /// Inline PEM, takes precedence over `public_key_path`.
    pub public_key_pem: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub leeway_seconds: u64,
}

#[derive(Debug, Error)]
pub enum AuthConfigError {
    #[error("no public key configured for token verification")]
    MissingKey,
    #[error("failed to read public key {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid RSA public key: {0}")]
    InvalidKey(#[from] jsonwebtoken::errors::Error),
}

/// Verifies bearer tokens and enforces scopes.
#[derive(Clone)]
pub struct AuthGate {
    key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGate")
            .field("issuer", &self.validation.iss)
            .field("audience", &self.validation.aud)
            .finish_non_exhaustive()
    }
}

impl AuthGate {
    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self, AuthConfigError> {
        let key = DecodingKey::from_rsa_pem(pem)?;
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        Ok(Self { key, validation })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthConfigError> {
        let pem = match (&config.public_key_pem, &config.public_key_path) {
            (Some(pem), _) => pem.clone().into_bytes(),
            (None, Some(path)) => read_key(path)?,
            (None, None) => return Err(AuthConfigError::MissingKey),
        };

        let mut gate = Self::from_rsa_pem(&pem)?.with_leeway(config.leeway_seconds);
        if let Some(issuer) = &config.issuer {
            gate = gate.with_issuer(issuer);
        }
        if let Some(audience) = &config.audience {
            gate = gate.with_audience(audience);
        }
        Ok(gate)
    }

    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    pub fn with_audience(mut self, audience: &str) -> Self {
        self.validation.set_audience(&[audience]);
        self.validation.validate_aud = true;
        self
    }

    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.validation.leeway = seconds;
        self
    }

    /// Verifies the raw `Authorization` header value and checks that the
    /// token grants `required`.
    pub fn authorize(
        &self,
        authorization: Option<&str>,
        required: Access,
    ) -> Result<Identity, BrokerError> {
        let token = authorization
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| BrokerError::unauthenticated("missing or invalid authorization header"))?;

        let claims = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|error| match error.kind() {
                JwtErrorKind::ExpiredSignature => BrokerError::unauthenticated("token expired"),
                _ => {
                    warn!(error = %error, "rejected bearer token");
                    BrokerError::forbidden("invalid token")
                }
            })?
            .claims;

        let identity = Identity {
            subject: claims.sub,
            scopes: claims.scope.map(ScopeClaim::into_scopes).unwrap_or_default(),
        };

        match identity.access() {
            None => Err(BrokerError::forbidden("token carries no vnf scope")),
            Some(granted) if granted < required => Err(BrokerError::forbidden(format!(
                "{} access required",
                required.as_str()
            ))),
            Some(_) => Ok(identity),
        }
    }
}

fn read_key(path: &Path) -> Result<Vec<u8>, AuthConfigError> {
    std::fs::read(path).map_err(|source| AuthConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
