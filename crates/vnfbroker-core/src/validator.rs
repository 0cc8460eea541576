//! Startup checks run on every dictionary before it is registered.
//!
//! Structural problems are caught while loading; this module adds the policy
//! layer on top: which vendors and products the broker supports, whether the
//! dictionary version is well formed, and whether it can run on this broker.

use std::cmp::Ordering;

use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::dictionary::VendorDictionary;

/// Vendors and products with a maintained dictionary.
pub const SUPPORTED_VENDORS: &[(&str, &[&str])] = &[
    ("Netgate", &["pfSense"]),
    ("Fortinet", &["FortiGate"]),
    ("Palo Alto Networks", &["PA Series"]),
    ("VyOS", &["VyOS"]),
];

/// Outcome of validating one dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Parsed `major.minor.patch` triple. Missing components count as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemVer {
    /// Accepts `X.Y`, `X.Y.Z`, and either followed by a `-pre` or `+build`
    /// suffix.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let core_end = value.find(['-', '+']).unwrap_or(value.len());
        let (core, suffix) = value.split_at(core_end);
        if core_end < value.len() && suffix.len() < 2 {
            return None;
        }

        let parts = core.split('.').collect::<Vec<_>>();
        if !(2..=3).contains(&parts.len()) {
            return None;
        }
        let mut numbers = [0_u64; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            *slot = part.parse().ok()?;
        }

        Some(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
        })
    }
}

/// Whether a dictionary may run on a given broker version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compatibility {
    Compatible,
    /// Same major, newer minor: may rely on features this broker lacks.
    CompatibleWithWarning(String),
    Incompatible(String),
}

impl Compatibility {
    pub fn is_compatible(&self) -> bool {
        !matches!(self, Self::Incompatible(_))
    }
}

pub fn check_compatibility(
    dictionary_version: &str,
    broker_version: &str,
    min_broker_version: Option<&str>,
) -> Compatibility {
    let (Some(dictionary), Some(broker)) = (
        SemVer::parse(dictionary_version),
        SemVer::parse(broker_version),
    ) else {
        return Compatibility::Incompatible(format!(
            "cannot compare dictionary version '{dictionary_version}' with broker version '{broker_version}'"
        ));
    };

    if dictionary.major > broker.major {
        return Compatibility::Incompatible(format!(
            "dictionary v{dictionary_version} requires broker v{}.x.x or higher (current: v{broker_version})",
            dictionary.major
        ));
    }

    if let Some(minimum) = min_broker_version {
        let Some(required) = SemVer::parse(minimum) else {
            return Compatibility::Incompatible(format!(
                "invalid min_broker_version '{minimum}'"
            ));
        };
        if broker.cmp(&required) == Ordering::Less {
            return Compatibility::Incompatible(format!(
                "dictionary requires minimum broker version {minimum} (current: {broker_version})"
            ));
        }
    }

    if dictionary.major == broker.major && dictionary.minor > broker.minor {
        return Compatibility::CompatibleWithWarning(format!(
            "dictionary v{dictionary_version} may use features not available in broker v{broker_version}"
        ));
    }
    Compatibility::Compatible
}

/// Policy checks applied at startup. In dev mode unknown vendors and products
/// are downgraded to warnings.
#[derive(Debug, Clone)]
pub struct DictionaryValidator {
    broker_version: String,
    dev_mode: bool,
}

impl DictionaryValidator {
    pub fn new(broker_version: impl Into<String>) -> Self {
        Self {
            broker_version: broker_version.into(),
            dev_mode: false,
        }
    }

    /// Validator honoring the engine's `dev_mode` switch.
    pub fn from_config(config: &EngineConfig, broker_version: impl Into<String>) -> Self {
        Self::new(broker_version).dev_mode(config.dev_mode)
    }

    pub fn dev_mode(mut self, enabled: bool) -> Self {
        self.dev_mode = enabled;
        self
    }

    pub fn validate(&self, dictionary: &VendorDictionary) -> ValidationReport {
        let mut report = ValidationReport::default();
        let mut unsupported = |message: String| {
            if self.dev_mode {
                report.warnings.push(message);
            } else {
                report.errors.push(message);
            }
        };

        match SUPPORTED_VENDORS
            .iter()
            .find(|(vendor, _)| *vendor == dictionary.vendor)
        {
            None => unsupported(format!(
                "unknown vendor: {}. Supported: {}",
                dictionary.vendor,
                SUPPORTED_VENDORS
                    .iter()
                    .map(|(vendor, _)| *vendor)
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            Some((vendor, products)) if !products.contains(&dictionary.product.as_str()) => {
                unsupported(format!(
                    "unknown product: {} for vendor {vendor}. Supported: {}",
                    dictionary.product,
                    products.join(", ")
                ));
            }
            Some(_) => {}
        }

        if dictionary.version.trim().is_empty() {
            report.warnings.push(String::from("missing version field"));
        } else if SemVer::parse(&dictionary.version).is_none() {
            report.warnings.push(format!(
                "version '{}' is not valid semver format",
                dictionary.version
            ));
        } else {
            match check_compatibility(
                &dictionary.version,
                &self.broker_version,
                dictionary.compatibility.min_broker_version.as_deref(),
            ) {
                Compatibility::Compatible => {}
                Compatibility::CompatibleWithWarning(reason) => report.warnings.push(reason),
                Compatibility::Incompatible(reason) => report.errors.push(reason),
            }
        }

        for warning in &report.warnings {
            warn!(vendor = %dictionary.vendor, product = %dictionary.product, "{warning}");
        }
        if report.is_valid() {
            info!(
                vendor = %dictionary.vendor,
                product = %dictionary.product,
                version = %dictionary.version,
                operations = dictionary.operations.len(),
                "dictionary validated"
            );
        }
        report
    }
}
