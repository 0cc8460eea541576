//! Dictionary-driven execution of canonical operations against one vendor.
//!
//! The engine never contains vendor-specific code: it renders the request the
//! dictionary describes, issues it under the dictionary's timeout and retry
//! budget, and folds the vendor's response back into an [`OperationOutcome`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::context::ExecutionContext;
use crate::dictionary::{AuthDescriptor, OperationSpec, PostOperationHook, VendorDictionary};
use crate::error::{BrokerError, ErrorKind};
use crate::http_client::{
    HttpAuth, HttpClient, HttpError, HttpErrorKind, HttpMethod, HttpRequest, HttpResponse,
};
use crate::retry::{Backoff, RetryPolicy};
use crate::template::{Template, TemplateError};
use crate::throttling::VendorThrottle;

/// Where post-operation hooks run relative to the primary call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookMode {
    /// Sequentially, before the outcome is returned.
    #[default]
    Inline,
    /// On a spawned task; failures are only logged.
    Detached,
}

/// Per-call knobs supplied by the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// The caller deduplicates this request, so even non-idempotent methods
    /// may be retried.
    pub idempotency_guarded: bool,
}

/// A hook that failed without `ignore_errors`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookFailure {
    pub hook: String,
    pub message: String,
}

/// Canonical result of one vendor exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    pub success: bool,
    pub vendor_ref: Option<String>,
    pub message: String,
    pub error_code: Option<ErrorKind>,
    pub status: u16,
    pub body: Value,
    pub attempts: u32,
    pub hook_failures: Vec<HookFailure>,
}

impl OperationOutcome {
    /// The failure this outcome represents, if any.
    pub fn error(&self) -> Option<BrokerError> {
        if self.success {
            return None;
        }
        let kind = self.error_code.unwrap_or(ErrorKind::UpstreamError);
        Some(BrokerError::new(kind, self.message.clone()))
    }
}

/// Executes operations for one vendor dictionary.
#[derive(Clone)]
pub struct DictionaryEngine {
    dictionary: Arc<VendorDictionary>,
    client: Arc<dyn HttpClient>,
    retry: RetryPolicy,
    throttle: Option<VendorThrottle>,
    hook_mode: HookMode,
}

impl std::fmt::Debug for DictionaryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DictionaryEngine")
            .field("vendor", &self.dictionary.vendor)
            .field("product", &self.dictionary.product)
            .field("retry", &self.retry)
            .field("hook_mode", &self.hook_mode)
            .finish_non_exhaustive()
    }
}

impl DictionaryEngine {
    pub fn new(dictionary: Arc<VendorDictionary>, client: Arc<dyn HttpClient>) -> Self {
        let retry = RetryPolicy::with_attempts(dictionary.retry_attempts);
        let throttle = dictionary.rate_limit.map(VendorThrottle::from_limit);
        Self {
            dictionary,
            client,
            retry,
            throttle,
            hook_mode: HookMode::default(),
        }
    }

    pub fn with_hook_mode(mut self, mode: HookMode) -> Self {
        self.hook_mode = mode;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.retry = self.retry.with_backoff(backoff);
        self
    }

    pub fn dictionary(&self) -> &VendorDictionary {
        &self.dictionary
    }

    /// Renders and issues `operation`.
    ///
    /// Errors are returned for failures before a vendor response exists:
    /// unknown operation or variant, unrenderable request, exhausted vendor
    /// quota, or a transport failure. A vendor that answered, successfully or
    /// not, yields an outcome.
    pub async fn execute(
        &self,
        operation: &str,
        context: &ExecutionContext,
        options: ExecuteOptions,
    ) -> Result<OperationOutcome, BrokerError> {
        let spec = self.dictionary.select_operation(operation, context)?;
        let context = self.enrich(context);

        let request = self.build_request(
            spec.method,
            &spec.endpoint,
            spec.request_template.as_ref(),
            &context,
            self.dictionary.timeout(),
        )?;

        if let Some(throttle) = &self.throttle {
            throttle.acquire().map_err(|wait| {
                warn!(operation, vendor = %self.dictionary.vendor, "vendor quota exhausted");
                BrokerError::rate_limited(
                    format!("outbound quota for {} exhausted", self.dictionary.product),
                    wait,
                )
            })?;
        }

        info!(
            operation,
            vendor = %self.dictionary.vendor,
            method = %spec.method,
            "executing vendor operation"
        );
        let retries_permitted = RetryPolicy::permits_retry(spec.method, options.idempotency_guarded);
        let (response, attempts) = self.send_with_retries(request, retries_permitted).await;
        let response = response.map_err(|error| self.transport_error(operation, error))?;

        let mut outcome = parse_response(spec, &response, attempts);
        if outcome.success {
            outcome.hook_failures = self.run_hooks(operation, &context, &outcome).await;
        } else {
            warn!(
                operation,
                status = response.status,
                code = ?outcome.error_code,
                "vendor reported failure"
            );
        }
        Ok(outcome)
    }

    /// Checks the appliance. A dictionary without `health_check` counts as healthy.
    pub async fn health_check(&self, context: &ExecutionContext) -> bool {
        let Some(health) = &self.dictionary.health_check else {
            return true;
        };
        let context = self.enrich(context);
        let request = match self.build_request(
            health.method,
            &health.endpoint,
            None,
            &context,
            health.timeout(),
        ) {
            Ok(request) => request,
            Err(error) => {
                warn!(vendor = %self.dictionary.vendor, %error, "health check could not be rendered");
                return false;
            }
        };

        match self.send_once(request, health.timeout()).await {
            Ok(response) => match &health.success_indicator {
                Some(indicator) => {
                    let body = serde_json::from_str(&response.body).unwrap_or(Value::Null);
                    indicator.evaluate(&body, &context)
                }
                None => response.status < 300,
            },
            Err(error) => {
                error!(vendor = %self.dictionary.vendor, %error, "health check failed");
                false
            }
        }
    }

    fn enrich(&self, context: &ExecutionContext) -> ExecutionContext {
        let mut context = context.clone();
        let vendor = self.dictionary.vendor_values(&context);
        context.insert("vendor", vendor);
        context
    }

    fn build_request(
        &self,
        method: HttpMethod,
        endpoint: &Template,
        body: Option<&Template>,
        context: &ExecutionContext,
        timeout: Duration,
    ) -> Result<HttpRequest, BrokerError> {
        let base = render(&self.dictionary.api_base_url, context, "api_base_url")?;
        let path = render(endpoint, context, "endpoint")?;
        let mut request = HttpRequest::new(method, format!("{base}{path}"))
            .with_header("accept", "application/json")
            .with_auth(&self.render_auth(context)?)
            .with_timeout(timeout);

        if let Some(template) = body.filter(|_| method.carries_body()) {
            let rendered = render(template, context, "request_template")?;
            if !rendered.trim().is_empty() {
                serde_json::from_str::<Value>(&rendered).map_err(|e| {
                    BrokerError::validation(format!("rendered request body is not valid JSON: {e}"))
                })?;
                request = request.with_json_body(rendered);
            }
        }
        Ok(request)
    }

    fn render_auth(&self, context: &ExecutionContext) -> Result<HttpAuth, BrokerError> {
        Ok(match &self.dictionary.authentication {
            AuthDescriptor::None => HttpAuth::None,
            AuthDescriptor::Basic { credentials } => HttpAuth::Basic {
                username: render(&credentials.username, context, "authentication.username")?,
                password: render(&credentials.password, context, "authentication.password")?,
            },
            AuthDescriptor::Bearer { token } => {
                HttpAuth::BearerToken(render(token, context, "authentication.token")?)
            }
        })
    }

    async fn send_with_retries(
        &self,
        request: HttpRequest,
        retries_permitted: bool,
    ) -> (Result<HttpResponse, HttpError>, u32) {
        let max_attempts = if retries_permitted {
            self.retry.max_attempts
        } else {
            1
        };
        let mut attempt = 1;
        loop {
            let result = self.send_once(request.clone(), self.dictionary.timeout()).await;
            let cause = self.retry.retry_cause(&result);
            match cause {
                Some(cause) if attempt < max_attempts => {
                    let delay = self.retry.delay_for_attempt(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts,
                        ?cause,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "retrying vendor call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                _ => return (result, attempt),
            }
        }
    }

    async fn send_once(
        &self,
        request: HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, HttpError> {
        match tokio::time::timeout(timeout, self.client.execute(request)).await {
            Ok(result) => result,
            Err(_) => Err(HttpError::timeout(format!(
                "no response within {}s",
                timeout.as_secs_f64()
            ))),
        }
    }

    fn transport_error(&self, operation: &str, error: HttpError) -> BrokerError {
        error!(operation, vendor = %self.dictionary.vendor, %error, "vendor transport failure");
        match error.kind() {
            HttpErrorKind::Timeout => BrokerError::upstream_timeout(format!(
                "{} did not respond: {error}",
                self.dictionary.product
            )),
            HttpErrorKind::Connect => BrokerError::upstream_unreachable(format!(
                "{} is unreachable: {error}",
                self.dictionary.product
            )),
            HttpErrorKind::Other => BrokerError::upstream(error.message()),
        }
    }

    async fn run_hooks(
        &self,
        operation: &str,
        context: &ExecutionContext,
        outcome: &OperationOutcome,
    ) -> Vec<HookFailure> {
        if self.dictionary.post_operation_hooks.is_empty() {
            return Vec::new();
        }
        let mut hook_context = context.clone();
        hook_context.insert("operation", operation);
        hook_context.insert("response", outcome.body.clone());
        if let Some(vendor_ref) = &outcome.vendor_ref {
            hook_context.insert("vendor_ref", vendor_ref.as_str());
        }
        let body = outcome.body.clone();

        match self.hook_mode {
            HookMode::Inline => self.run_hooks_inline(&hook_context, &body).await,
            HookMode::Detached => {
                let engine = self.clone();
                tokio::spawn(async move {
                    let failures = engine.run_hooks_inline(&hook_context, &body).await;
                    if !failures.is_empty() {
                        warn!(failed = failures.len(), "detached hooks reported failures");
                    }
                });
                Vec::new()
            }
        }
    }

    async fn run_hooks_inline(&self, context: &ExecutionContext, body: &Value) -> Vec<HookFailure> {
        let mut failures = Vec::new();
        for hook in &self.dictionary.post_operation_hooks {
            if !hook
                .condition
                .as_ref()
                .is_none_or(|condition| condition.evaluate(body, context))
            {
                debug!(hook = %hook.name, "hook condition not met");
                continue;
            }
            if let Err(message) = self.run_hook(hook, context).await {
                if hook.ignore_errors {
                    warn!(hook = %hook.name, %message, "ignored hook failure");
                } else {
                    error!(hook = %hook.name, %message, "hook failed");
                    failures.push(HookFailure {
                        hook: hook.name.clone(),
                        message,
                    });
                }
            }
        }
        failures
    }

    async fn run_hook(&self, hook: &PostOperationHook, context: &ExecutionContext) -> Result<(), String> {
        let request = self
            .build_request(
                hook.method,
                &hook.endpoint,
                hook.request_template.as_ref(),
                context,
                self.dictionary.timeout(),
            )
            .map_err(|error| error.message().to_owned())?;
        info!(hook = %hook.name, method = %hook.method, "executing hook");

        let response = self
            .send_once(request, self.dictionary.timeout())
            .await
            .map_err(|error| error.to_string())?;
        if response.status >= 400 {
            return Err(format!(
                "HTTP {}: {}",
                response.status,
                error_message(&response)
            ));
        }
        Ok(())
    }
}

fn render(template: &Template, context: &ExecutionContext, what: &str) -> Result<String, BrokerError> {
    template.render(context).map_err(|error: TemplateError| {
        BrokerError::validation(format!("cannot render {what}: {error}"))
    })
}

fn parse_response(spec: &OperationSpec, response: &HttpResponse, attempts: u32) -> OperationOutcome {
    let body = serde_json::from_str::<Value>(&response.body)
        .unwrap_or_else(|_| serde_json::json!({ "text": response.body }));

    if response.status >= 400 {
        return OperationOutcome {
            success: false,
            vendor_ref: None,
            message: error_message(response),
            error_code: Some(spec.error_kind_for(response.status)),
            status: response.status,
            body,
            attempts,
            hook_failures: Vec::new(),
        };
    }

    let vendor_ref = spec
        .response_mapping
        .vendor_ref
        .as_ref()
        .and_then(|path| path.find(&body))
        .and_then(|value| match value {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        });
    let success = match &spec.response_mapping.success_indicator {
        Some(indicator) => {
            let variables = ExecutionContext::new().with("status", response.status);
            indicator.evaluate(&body, &variables)
        }
        None => response.status < 300,
    };

    let message = if success {
        String::from("operation completed successfully")
    } else {
        body_message(&body)
            .unwrap_or_else(|| String::from("vendor response did not satisfy the success indicator"))
    };
    OperationOutcome {
        success,
        vendor_ref,
        message,
        error_code: (!success).then_some(ErrorKind::UpstreamError),
        status: response.status,
        body,
        attempts,
        hook_failures: Vec::new(),
    }
}

fn body_message(body: &Value) -> Option<String> {
    ["message", "error"]
        .iter()
        .find_map(|field| body.get(*field).and_then(Value::as_str))
        .map(str::to_owned)
}

fn error_message(response: &HttpResponse) -> String {
    serde_json::from_str::<Value>(&response.body)
        .ok()
        .and_then(|body| body_message(&body))
        .or_else(|| {
            let text = response.body.trim();
            (!text.is_empty()).then(|| text.to_owned())
        })
        .unwrap_or_else(|| format!("HTTP {}", response.status))
}
