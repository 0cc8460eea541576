//! Typed per-vendor dictionaries.
//!
//! A dictionary describes, declaratively, how each canonical operation is
//! spoken in one vendor's REST dialect. Templates and expressions are compiled
//! while the YAML document is deserialized, so a dictionary that loads is a
//! dictionary the engine can execute.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::context::ExecutionContext;
use crate::error::{BrokerError, ErrorKind};
use crate::expr::{Expression, FieldPath};
use crate::http_client::HttpMethod;
use crate::template::Template;

#[derive(Debug, Error)]
pub enum DictionaryError {
    #[error("failed to read dictionary '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse dictionary: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("dictionary for {vendor} defines no operations")]
    NoOperations { vendor: String },
    #[error("invalid dictionary field '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

impl DictionaryError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Compatibility marker checked by the validator.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Compatibility {
    pub min_broker_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BasicCredentials {
    pub username: Template,
    pub password: Template,
}

/// How the engine authenticates against the appliance. Every field is a
/// template so credentials come from the backend instance, never the file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthDescriptor {
    #[default]
    None,
    Basic { credentials: BasicCredentials },
    Bearer { token: Template },
}

/// Outbound request quota protecting the appliance itself.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct VendorRateLimit {
    pub requests: u32,
    #[serde(default = "default_rate_window")]
    pub per_seconds: u64,
}

fn default_rate_window() -> u64 {
    1
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseMapping {
    pub vendor_ref: Option<FieldPath>,
    pub success_indicator: Option<Expression>,
}

/// One canonical operation in the vendor's dialect.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationSpec {
    pub method: HttpMethod,
    pub endpoint: Template,
    #[serde(default, alias = "body_template")]
    pub request_template: Option<Template>,
    #[serde(default)]
    pub response_mapping: ResponseMapping,
    #[serde(default)]
    pub error_mapping: BTreeMap<u16, ErrorKind>,
    #[serde(default)]
    pub description: Option<String>,
}

impl OperationSpec {
    pub fn error_kind_for(&self, status: u16) -> ErrorKind {
        self.error_mapping
            .get(&status)
            .copied()
            .unwrap_or(ErrorKind::UpstreamError)
    }
}

/// Canonical operation the vendor splits across several endpoints. The
/// operation that runs is picked by the value of `field` in the context.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationVariants {
    pub field: String,
    /// `field value -> operation name`.
    pub cases: BTreeMap<String, String>,
    /// Operation used when the field is absent or null.
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostOperationHook {
    pub name: String,
    #[serde(default)]
    pub condition: Option<Expression>,
    pub method: HttpMethod,
    pub endpoint: Template,
    #[serde(default, alias = "body_template")]
    pub request_template: Option<Template>,
    #[serde(default)]
    pub ignore_errors: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckSpec {
    #[serde(default = "default_health_method")]
    pub method: HttpMethod,
    pub endpoint: Template,
    #[serde(default = "default_health_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub success_indicator: Option<Expression>,
}

fn default_health_method() -> HttpMethod {
    HttpMethod::Get
}

fn default_health_timeout() -> u64 {
    5
}

impl HealthCheckSpec {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Immutable definition of one vendor's dialect.
#[derive(Debug, Clone, Deserialize)]
pub struct VendorDictionary {
    pub vendor: String,
    pub product: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub compatibility: Compatibility,
    pub api_base_url: Template,
    #[serde(default)]
    pub authentication: AuthDescriptor,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default)]
    pub rate_limit: Option<VendorRateLimit>,
    /// `field -> canonical value -> vendor value`.
    #[serde(default)]
    pub value_maps: BTreeMap<String, BTreeMap<String, String>>,
    pub operations: BTreeMap<String, OperationSpec>,
    #[serde(default)]
    pub operation_variants: BTreeMap<String, OperationVariants>,
    #[serde(default)]
    pub post_operation_hooks: Vec<PostOperationHook>,
    #[serde(default)]
    pub health_check: Option<HealthCheckSpec>,
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

impl VendorDictionary {
    pub fn from_yaml_str(document: &str) -> Result<Self, DictionaryError> {
        let dictionary: Self = serde_yaml::from_str(document)?;
        dictionary.check_structure()?;
        Ok(dictionary)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DictionaryError> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|source| DictionaryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&document)
    }

    pub fn operation(&self, name: &str) -> Option<&OperationSpec> {
        self.operations.get(name)
    }

    /// Whether `name` runs directly or through its variants.
    pub fn supports(&self, name: &str) -> bool {
        self.operations.contains_key(name) || self.operation_variants.contains_key(name)
    }

    /// Resolves `name` to the operation that runs for `context`.
    pub fn select_operation(
        &self,
        name: &str,
        context: &ExecutionContext,
    ) -> Result<&OperationSpec, BrokerError> {
        if let Some(spec) = self.operation(name) {
            return Ok(spec);
        }
        let variants = self
            .operation_variants
            .get(name)
            .ok_or_else(|| BrokerError::operation_not_found(name))?;

        let field = &variants.field;
        let chosen = match context.get(field) {
            None | Some(Value::Null) => variants.default.as_ref().ok_or_else(|| {
                BrokerError::validation(format!(
                    "{field} is required by {} for {name}",
                    self.product
                ))
            })?,
            Some(Value::String(value)) => variants.cases.get(value).ok_or_else(|| {
                BrokerError::validation(format!(
                    "{field} '{value}' is not supported by {} for {name}",
                    self.product
                ))
            })?,
            Some(other) => {
                return Err(BrokerError::validation(format!(
                    "{field} must be a string, got {other}"
                )))
            }
        };
        self.operation(chosen)
            .ok_or_else(|| BrokerError::operation_not_found(chosen))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Vendor-side spellings of canonical field values present in `context`,
    /// exposed to templates as `vendor.<field>`. Unmapped values pass through.
    pub fn vendor_values(&self, context: &ExecutionContext) -> Value {
        let mut mapped = Map::new();
        for (field, table) in &self.value_maps {
            let Some(value) = context.get(field) else {
                continue;
            };
            let translated = match value {
                Value::String(canonical) => table
                    .get(canonical)
                    .map_or_else(|| value.clone(), |vendor| Value::String(vendor.clone())),
                Value::Bool(flag) => table
                    .get(&flag.to_string())
                    .map_or_else(|| value.clone(), |vendor| Value::String(vendor.clone())),
                _ => value.clone(),
            };
            mapped.insert(field.clone(), translated);
        }
        Value::Object(mapped)
    }

    fn check_structure(&self) -> Result<(), DictionaryError> {
        if self.vendor.trim().is_empty() {
            return Err(DictionaryError::invalid("vendor", "must not be empty"));
        }
        if self.product.trim().is_empty() {
            return Err(DictionaryError::invalid("product", "must not be empty"));
        }
        if self.api_base_url.is_blank() {
            return Err(DictionaryError::invalid("api_base_url", "must not be empty"));
        }
        if self.operations.is_empty() {
            return Err(DictionaryError::NoOperations {
                vendor: self.vendor.clone(),
            });
        }
        if self.timeout_seconds == 0 {
            return Err(DictionaryError::invalid(
                "timeout_seconds",
                "must be greater than zero",
            ));
        }
        if self.retry_attempts == 0 {
            return Err(DictionaryError::invalid(
                "retry_attempts",
                "must allow at least one attempt",
            ));
        }
        if let Some(limit) = self.rate_limit {
            if limit.requests == 0 || limit.per_seconds == 0 {
                return Err(DictionaryError::invalid(
                    "rate_limit",
                    "requests and per_seconds must be greater than zero",
                ));
            }
        }
        for (name, operation) in &self.operations {
            if operation.endpoint.is_blank() {
                return Err(DictionaryError::invalid(
                    format!("operations.{name}.endpoint"),
                    "must not be empty",
                ));
            }
            if let Some(status) = operation
                .error_mapping
                .keys()
                .find(|status| !(400..=599).contains(*status))
            {
                return Err(DictionaryError::invalid(
                    format!("operations.{name}.error_mapping"),
                    format!("status {status} is not an error status"),
                ));
            }
        }
        for (name, variants) in &self.operation_variants {
            if self.operations.contains_key(name) {
                return Err(DictionaryError::invalid(
                    format!("operation_variants.{name}"),
                    "is also defined in operations",
                ));
            }
            if variants.field.trim().is_empty() {
                return Err(DictionaryError::invalid(
                    format!("operation_variants.{name}.field"),
                    "must not be empty",
                ));
            }
            let targets = variants
                .cases
                .iter()
                .map(|(value, target)| (format!("operation_variants.{name}.cases.{value}"), target))
                .chain(
                    variants
                        .default
                        .iter()
                        .map(|target| (format!("operation_variants.{name}.default"), target)),
                );
            for (field, target) in targets {
                if !self.operations.contains_key(target) {
                    return Err(DictionaryError::invalid(
                        field,
                        format!("unknown operation '{target}'"),
                    ));
                }
            }
        }
        for hook in &self.post_operation_hooks {
            if hook.name.trim().is_empty() {
                return Err(DictionaryError::invalid(
                    "post_operation_hooks.name",
                    "must not be empty",
                ));
            }
        }
        if let Some(health) = &self.health_check {
            if health.timeout_seconds == 0 {
                return Err(DictionaryError::invalid(
                    "health_check.timeout_seconds",
                    "must be greater than zero",
                ));
            }
        }
        Ok(())
    }
}
