//! Registry mapping VNF instances to the dictionary engine that speaks their
//! dialect.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::context::ExecutionContext;
use crate::dictionary::{DictionaryError, VendorDictionary};
use crate::engine::{DictionaryEngine, HookMode};
use crate::error::BrokerError;
use crate::http_client::HttpClient;
use crate::retry::Backoff;
use crate::validator::DictionaryValidator;

/// One managed appliance.
///
/// `variables` are exposed to the dictionary templates, typically `vnf_host`
/// and `credentials.username`/`credentials.password`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendInstance {
    pub id: String,
    /// Dictionary key, e.g. `pfsense`.
    pub vendor: String,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
}

impl BackendInstance {
    pub fn new(id: impl Into<String>, vendor: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vendor: vendor.into(),
            variables: BTreeMap::new(),
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn context(&self) -> ExecutionContext {
        let mut context = ExecutionContext::new();
        for (name, value) in &self.variables {
            context.insert(name.clone(), value.clone());
        }
        context.insert("vnf_instance_id", self.id.clone());
        context
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Dictionary(#[from] DictionaryError),
    #[error("dictionary {vendor}/{product} rejected: {}", errors.join("; "))]
    Rejected {
        vendor: String,
        product: String,
        errors: Vec<String>,
    },
}

/// Instance and dictionary lookup shared by every request.
///
/// Engines are keyed by dictionary key. Replacing a dictionary swaps the whole
/// engine under the map's shard lock, so in-flight requests finish on the old
/// engine and later ones see the new dictionary.
#[derive(Clone)]
pub struct BackendRegistry {
    client: Arc<dyn HttpClient>,
    hook_mode: HookMode,
    backoff: Option<Backoff>,
    engines: Arc<DashMap<String, Arc<DictionaryEngine>>>,
    instances: Arc<DashMap<String, BackendInstance>>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("dictionaries", &self.engines.len())
            .field("instances", &self.instances.len())
            .field("hook_mode", &self.hook_mode)
            .finish_non_exhaustive()
    }
}

impl BackendRegistry {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            client,
            hook_mode: HookMode::default(),
            backoff: None,
            engines: Arc::new(DashMap::new()),
            instances: Arc::new(DashMap::new()),
        }
    }

    pub fn with_hook_mode(mut self, mode: HookMode) -> Self {
        self.hook_mode = mode;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    fn engine_for(&self, dictionary: VendorDictionary) -> DictionaryEngine {
        let engine = DictionaryEngine::new(Arc::new(dictionary), Arc::clone(&self.client))
            .with_hook_mode(self.hook_mode);
        match self.backoff {
            Some(backoff) => engine.with_backoff(backoff),
            None => engine,
        }
    }

    /// Registers or replaces the dictionary under `key`.
    pub fn replace_dictionary(&self, key: impl Into<String>, dictionary: VendorDictionary) {
        let key = key.into();
        info!(
            key = %key,
            vendor = %dictionary.vendor,
            product = %dictionary.product,
            version = %dictionary.version,
            "dictionary registered"
        );
        self.engines
            .insert(key, Arc::new(self.engine_for(dictionary)));
    }

    /// Runs `validator` on `dictionary` and registers it when it passes.
    pub fn register_validated(
        &self,
        key: impl Into<String>,
        dictionary: VendorDictionary,
        validator: &DictionaryValidator,
    ) -> Result<(), RegistryError> {
        let report = validator.validate(&dictionary);
        if !report.is_valid() {
            return Err(RegistryError::Rejected {
                vendor: dictionary.vendor,
                product: dictionary.product,
                errors: report.errors,
            });
        }
        self.replace_dictionary(key, dictionary);
        Ok(())
    }

    pub fn load_dictionary(
        &self,
        key: impl Into<String>,
        path: impl AsRef<Path>,
        validator: &DictionaryValidator,
    ) -> Result<(), RegistryError> {
        let dictionary = VendorDictionary::from_path(path)?;
        self.register_validated(key, dictionary, validator)
    }

    pub fn register_instance(&self, instance: BackendInstance) {
        info!(instance = %instance.id, vendor = %instance.vendor, "backend instance registered");
        self.instances.insert(instance.id.clone(), instance);
    }

    pub fn instance(&self, id: &str) -> Option<BackendInstance> {
        self.instances.get(id).map(|entry| entry.value().clone())
    }

    pub fn instance_ids(&self) -> Vec<String> {
        let mut ids = self
            .instances
            .iter()
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        ids.sort();
        ids
    }

    /// Resolves the instance and the engine currently registered for its
    /// vendor. Unknown instances and missing dictionaries are caller errors.
    pub fn resolve(&self, id: &str) -> Result<(BackendInstance, Arc<DictionaryEngine>), BrokerError> {
        let instance = self
            .instance(id)
            .ok_or_else(|| BrokerError::validation(format!("unknown VNF instance '{id}'")))?;
        let engine = self
            .engines
            .get(&instance.vendor)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                BrokerError::validation(format!(
                    "no dictionary registered for vendor '{}'",
                    instance.vendor
                ))
            })?;
        Ok((instance, engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::http_client::MockHttpClient;

    fn dictionary(version: &str) -> VendorDictionary {
        VendorDictionary::from_yaml_str(&format!(
            r#"
vendor: Netgate
product: pfSense
version: "{version}"
api_base_url: "https://{{{{ vnf_host }}}}"
operations:
  list_firewall_rules:
    method: GET
    endpoint: /api/v1/firewall/rules
"#
        ))
        .unwrap()
    }

    fn registry() -> BackendRegistry {
        BackendRegistry::new(Arc::new(MockHttpClient::new()))
    }

    #[test]
    fn resolves_registered_instance() {
        let registry = registry();
        registry.replace_dictionary("pfsense", dictionary("1.0.0"));
        registry.register_instance(
            BackendInstance::new("vnf-1", "pfsense").with_variable("vnf_host", "10.1.1.1"),
        );

        let (instance, engine) = registry.resolve("vnf-1").unwrap();
        assert_eq!(instance.context().get("vnf_host"), Some(&Value::from("10.1.1.1")));
        assert_eq!(engine.dictionary().product, "pfSense");
    }

    #[test]
    fn unknown_instance_or_vendor_is_a_validation_error() {
        let registry = registry();
        assert_eq!(
            registry.resolve("vnf-404").unwrap_err().kind(),
            ErrorKind::ValidationError
        );

        registry.register_instance(BackendInstance::new("vnf-2", "fortigate"));
        assert_eq!(
            registry.resolve("vnf-2").unwrap_err().kind(),
            ErrorKind::ValidationError
        );
    }

    #[test]
    fn replacing_a_dictionary_swaps_it_for_later_lookups() {
        let registry = registry();
        registry.replace_dictionary("pfsense", dictionary("1.0.0"));
        registry.register_instance(BackendInstance::new("vnf-1", "pfsense"));
        let (_, before) = registry.resolve("vnf-1").unwrap();

        registry.replace_dictionary("pfsense", dictionary("1.1.0"));
        let (_, after) = registry.resolve("vnf-1").unwrap();

        assert_eq!(before.dictionary().version, "1.0.0");
        assert_eq!(after.dictionary().version, "1.1.0");
    }

    #[test]
    fn rejected_dictionary_is_not_registered() {
        let registry = registry();
        let mut foreign = dictionary("1.0.0");
        foreign.vendor = String::from("Acme");

        let error = registry
            .register_validated("acme", foreign, &DictionaryValidator::new("1.0.0"))
            .unwrap_err();

        assert!(matches!(error, RegistryError::Rejected { .. }));
        registry.register_instance(BackendInstance::new("vnf-3", "acme"));
        assert!(registry.resolve("vnf-3").is_err());
    }
}
