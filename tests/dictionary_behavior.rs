//! Behavior-driven tests for vendor dictionaries: loading, startup
//! validation, request rendering, hooks and the outbound vendor quota.

mod support;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use support::{bearer, firewall_payload, harness, pfsense, PFSENSE_DICTIONARY};
use vnfbroker_core::{
    BackendRegistry, DictionaryEngine, DictionaryError, DictionaryValidator, EngineConfig,
    ErrorKind, ExecuteOptions, ExecutionContext, HookMode, MockHttpClient, RegistryError,
    VendorDictionary,
};

const BROKER_VERSION: &str = env!("CARGO_PKG_VERSION");

fn minimal_dictionary(vendor: &str, product: &str) -> String {
    format!(
        r#"
vendor: "{vendor}"
product: "{product}"
version: "0.1.0"
api_base_url: "https://{{{{ vnf_host }}}}"
operations:
  list_firewall_rules:
    method: GET
    endpoint: /rules
"#
    )
}

fn rule_context() -> ExecutionContext {
    ExecutionContext::new()
        .with("vnf_host", "fw.test")
        .with("credentials", json!({"username": "admin", "password": "secret"}))
        .with("ruleId", "fw-1")
        .with("action", "deny")
        .with("protocol", "udp")
        .with("sourceIp", "any")
        .with("destinationIp", "10.1.0.0/16")
        .with("destinationPort", 53)
        .with("enabled", false)
}

// =============================================================================
// Loading and startup validation
// =============================================================================

#[test]
fn when_shipped_pfsense_dictionary_is_loaded_system_accepts_it() {
    // Given: The pfSense dictionary shipped with the broker
    let dictionary = pfsense();

    // When: It is validated against this broker version
    let report = DictionaryValidator::new(BROKER_VERSION).validate(&dictionary);

    // Then: It passes and covers every canonical operation
    assert!(report.is_valid(), "{:?}", report.errors);
    for operation in [
        "create_firewall_rule",
        "update_firewall_rule",
        "delete_firewall_rule",
        "list_firewall_rules",
        "create_nat_rule",
        "delete_nat_rule",
    ] {
        assert!(dictionary.supports(operation), "{operation} is missing");
    }

    // And: NAT operations pick their table from natType
    let variants = &dictionary.operation_variants["create_nat_rule"];
    assert_eq!(variants.field, "natType");
    assert_eq!(variants.cases.len(), 3);
    assert!(variants.default.is_none());
}

#[test]
fn when_dictionary_file_is_loaded_from_disk_system_registers_it() {
    // Given: A dictionary written to disk
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(PFSENSE_DICTIONARY.as_bytes()).unwrap();
    let registry = BackendRegistry::new(Arc::new(MockHttpClient::new()));
    let validator = DictionaryValidator::new(BROKER_VERSION);

    // When: It is loaded by path
    let loaded = registry.load_dictionary("pfsense", file.path(), &validator);

    // Then: It is registered, while a missing file is reported as an I/O error
    assert!(loaded.is_ok(), "{loaded:?}");
    let missing = registry.load_dictionary("ghost", file.path().with_extension("missing"), &validator);
    assert!(matches!(
        missing,
        Err(RegistryError::Dictionary(DictionaryError::Io { .. }))
    ));
}

#[test]
fn when_vendor_is_unknown_system_rejects_outside_dev_mode() {
    // Given: A dictionary for a vendor the broker does not support
    let dictionary =
        VendorDictionary::from_yaml_str(&minimal_dictionary("Acme", "Wall")).unwrap();
    let registry = BackendRegistry::new(Arc::new(MockHttpClient::new()));

    // When: It is registered in production and in dev mode
    let strict = registry.register_validated(
        "acme",
        dictionary.clone(),
        &DictionaryValidator::new(BROKER_VERSION),
    );
    let relaxed = registry.register_validated(
        "acme",
        dictionary,
        &DictionaryValidator::new(BROKER_VERSION).dev_mode(true),
    );

    // Then: Only dev mode accepts it
    match strict {
        Err(RegistryError::Rejected { vendor, errors, .. }) => {
            assert_eq!(vendor, "Acme");
            assert!(errors[0].starts_with("unknown vendor: Acme"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(relaxed.is_ok());
}

#[test]
fn when_engine_config_enables_dev_mode_system_accepts_unknown_vendor() {
    // Given: An engine configuration loaded with dev mode switched on
    let config = EngineConfig {
        dev_mode: true,
        ..EngineConfig::default()
    };
    let dictionary =
        VendorDictionary::from_yaml_str(&minimal_dictionary("Acme", "Wall")).unwrap();
    let registry = BackendRegistry::new(Arc::new(MockHttpClient::new()));

    // When: The validator is built from that configuration
    let validator = DictionaryValidator::from_config(&config, BROKER_VERSION);
    let report = validator.validate(&dictionary);

    // Then: The unknown vendor is only a warning and registration succeeds
    assert!(report.is_valid(), "{:?}", report.errors);
    assert_eq!(report.warnings.len(), 1);
    assert!(registry.register_validated("acme", dictionary, &validator).is_ok());
}

#[test]
fn when_dictionary_requires_newer_broker_system_rejects_it() {
    // Given: A dictionary that needs a future broker
    let document = format!(
        "{}compatibility:\n  min_broker_version: \"99.0.0\"\n",
        minimal_dictionary("VyOS", "VyOS")
    );
    let dictionary = VendorDictionary::from_yaml_str(&document).unwrap();

    // When: It is validated
    let report = DictionaryValidator::new(BROKER_VERSION).validate(&dictionary);

    // Then: It is incompatible
    assert!(!report.is_valid());
}

#[test]
fn when_template_or_expression_is_malformed_system_refuses_to_load() {
    // Given: Dictionaries with an unclosed placeholder and a broken indicator
    let bad_template =
        PFSENSE_DICTIONARY.replace("/api/v1/firewall/rules", "/api/v1/firewall/{{ ruleId");
    let bad_expression = PFSENSE_DICTIONARY.replace(
        "success_indicator: \"$.status == 'healthy'\"",
        "success_indicator: \"$.status == 'healthy\"",
    );

    // When: They are parsed
    let template_result = VendorDictionary::from_yaml_str(&bad_template);
    let expression_result = VendorDictionary::from_yaml_str(&bad_expression);

    // Then: Both fail at load rather than at request time
    assert!(matches!(template_result, Err(DictionaryError::Parse(_))));
    assert!(matches!(expression_result, Err(DictionaryError::Parse(_))));
}

// =============================================================================
// Rendering
// =============================================================================

#[tokio::test]
async fn when_operation_executes_system_renders_vendor_vocabulary() {
    // Given: A pfSense engine
    let mock = Arc::new(MockHttpClient::new());
    mock.set_fallback(200, r#"{"status":"ok","data":{"id":"fw-1"}}"#);
    let engine = DictionaryEngine::new(Arc::new(pfsense()), mock.clone());

    // When: A deny rule for a disabled UDP flow is created
    let outcome = engine
        .execute("create_firewall_rule", &rule_context(), ExecuteOptions::default())
        .await
        .unwrap();

    // Then: The canonical values are translated
    assert!(outcome.success);
    let request = &mock.requests()[0];
    let body: serde_json::Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
    assert_eq!(body["type"], "block");
    assert_eq!(body["protocol"], "udp");
    assert_eq!(body["dstport"], 53);
    assert_eq!(body["disabled"], true);
    assert_eq!(request.headers["content-type"], "application/json");
}

#[tokio::test]
async fn when_same_context_is_rendered_twice_system_sends_identical_requests() {
    // Given: A pfSense engine and a fixed context
    let mock = Arc::new(MockHttpClient::new());
    mock.set_fallback(200, r#"{"status":"ok","data":{"id":"fw-1"}}"#);
    let engine = DictionaryEngine::new(Arc::new(pfsense()), mock.clone());
    let context = rule_context();

    // When: The same operation runs twice
    for _ in 0..2 {
        engine
            .execute("update_firewall_rule", &context, ExecuteOptions::default())
            .await
            .unwrap();
    }

    // Then: Rendering depends only on the context
    let puts: Vec<_> = mock
        .requests()
        .into_iter()
        .filter(|request| request.method.as_str() == "PUT")
        .collect();
    assert_eq!(puts.len(), 2);
    assert_eq!(puts[0].url, puts[1].url);
    assert_eq!(puts[0].body, puts[1].body);
}

#[tokio::test]
async fn when_operation_is_not_in_dictionary_system_reports_not_found() {
    // Given: A dictionary with only a list operation
    let dictionary =
        VendorDictionary::from_yaml_str(&minimal_dictionary("VyOS", "VyOS")).unwrap();
    let mock = Arc::new(MockHttpClient::new());
    let engine = DictionaryEngine::new(Arc::new(dictionary), mock.clone());

    // When: A create is requested
    let error = engine
        .execute("create_nat_rule", &rule_context(), ExecuteOptions::default())
        .await
        .unwrap_err();

    // Then: Nothing is sent
    assert_eq!(error.kind(), ErrorKind::OperationNotFound);
    assert_eq!(mock.request_count(), 0);
}

// =============================================================================
// Hooks and vendor quota
// =============================================================================

#[tokio::test]
async fn when_required_hook_fails_system_reports_it_alongside_success() {
    // Given: The apply hook is no longer allowed to fail silently
    let harness = harness();
    let strict = PFSENSE_DICTIONARY.replace("ignore_errors: true", "ignore_errors: false");
    harness
        .broker
        .backends()
        .replace_dictionary("pfsense", VendorDictionary::from_yaml_str(&strict).unwrap());
    harness
        .mock
        .push_response(201, r#"{"status":"ok","data":{"id":"fw-1"}}"#)
        .push_response(500, r#"{"status":"error","message":"filter reload failed"}"#);

    // When: A rule is created
    let response = harness
        .broker
        .create_firewall_rule(Some(&bearer("vnf:rw")), &firewall_payload())
        .await;

    // Then: The rule exists but the caller learns the apply step failed
    assert!(response.success);
    assert_eq!(response.error_kind(), Some(ErrorKind::UpstreamError));
    let failures = response.diagnostics.expect("diagnostics are attached").hook_failures;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].hook, "apply_filter_changes");
    assert!(failures[0].message.contains("filter reload failed"));
}

#[tokio::test(start_paused = true)]
async fn when_hooks_are_detached_system_answers_before_they_finish() {
    // Given: A required apply hook that stalls for ten seconds and then fails
    let strict = PFSENSE_DICTIONARY.replace("ignore_errors: true", "ignore_errors: false");
    let mock = Arc::new(MockHttpClient::new());
    mock.push_response(201, r#"{"status":"ok","data":{"id":"fw-1"}}"#)
        .push_delayed(
            Duration::from_secs(10),
            500,
            r#"{"status":"error","message":"filter reload failed"}"#,
        );
    let engine = DictionaryEngine::new(
        Arc::new(VendorDictionary::from_yaml_str(&strict).unwrap()),
        mock.clone(),
    )
    .with_hook_mode(HookMode::Detached);
    let started = tokio::time::Instant::now();

    // When: A rule is created
    let outcome = engine
        .execute("create_firewall_rule", &rule_context(), ExecuteOptions::default())
        .await
        .unwrap();

    // Then: The caller has its answer before the hook completes
    assert!(outcome.success);
    assert!(outcome.hook_failures.is_empty());
    assert!(started.elapsed() < Duration::from_secs(10));

    // And: The hook still runs in the background and its failure stays there
    tokio::time::sleep(Duration::from_secs(11)).await;
    let requests = mock.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].url, "https://fw.test/api/v1/firewall/apply");
}

#[tokio::test]
async fn when_primary_call_fails_system_skips_hooks() {
    // Given: An appliance rejecting the create
    let harness = harness();
    harness
        .mock
        .push_response(409, r#"{"status":"error","message":"rule exists"}"#);

    // When: A rule is created
    let response = harness
        .broker
        .create_firewall_rule(Some(&bearer("vnf:rw")), &firewall_payload())
        .await;

    // Then: The mapped error is returned and no apply call was made
    assert_eq!(response.error_kind(), Some(ErrorKind::ValidationError));
    assert_eq!(harness.calls_to("POST", "/api/v1/firewall/apply"), 0);
}

#[tokio::test]
async fn when_vendor_quota_is_exhausted_system_rejects_before_transport() {
    // Given: A vendor allowing one call per minute
    let document = format!(
        "{}rate_limit:\n  requests: 1\n  per_seconds: 60\n",
        minimal_dictionary("VyOS", "VyOS")
    );
    let mock = Arc::new(MockHttpClient::new());
    let engine = DictionaryEngine::new(
        Arc::new(VendorDictionary::from_yaml_str(&document).unwrap()),
        mock.clone(),
    );
    let context = ExecutionContext::new().with("vnf_host", "vyos.test");

    // When: Two calls are made back to back
    let first = engine
        .execute("list_firewall_rules", &context, ExecuteOptions::default())
        .await;
    let second = engine
        .execute("list_firewall_rules", &context, ExecuteOptions::default())
        .await;

    // Then: The second is refused locally with a wait hint
    assert!(first.is_ok());
    let error = second.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::RateLimitExceeded);
    assert!(error.retry_after().is_some());
    assert_eq!(mock.request_count(), 1);
}
