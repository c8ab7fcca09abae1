//! Tool trait and registry
//!
//! Tools are deterministic, side-effect-free operations agents call for
//! calculations. Every invocation goes through the registry, which validates
//! arguments against the tool's schema, races the handler against a timeout,
//! and retries transient failures with exponential backoff.

pub mod builtin;

use crate::error::OrchestrationError;
use crate::Result;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

//
// ================= Schemas =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParamKind {
    fn name(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Number => "number",
            ParamKind::Integer => "integer",
            ParamKind::Boolean => "boolean",
            ParamKind::Object => "object",
            ParamKind::Array => "array",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Number => value.is_number(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Object => value.is_object(),
            ParamKind::Array => value.is_array(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

impl ParameterSpec {
    pub const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            description,
        }
    }

    pub const fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            description,
        }
    }
}

/// Declared parameter shape for a tool. Compiled once at registration so a
/// malformed schema is rejected before the tool can ever be invoked.
#[derive(Debug, Clone, Default)]
pub struct ToolSchema {
    pub parameters: Vec<ParameterSpec>,
}

impl ToolSchema {
    pub fn new(parameters: Vec<ParameterSpec>) -> Self {
        Self { parameters }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Structural checks on the schema itself.
    fn compile(&self) -> std::result::Result<(), String> {
        let mut seen = HashSet::new();
        for param in &self.parameters {
            if param.name.is_empty() {
                return Err("parameter name must not be empty".to_string());
            }
            if !seen.insert(param.name) {
                return Err(format!("duplicate parameter '{}'", param.name));
            }
        }
        Ok(())
    }

    /// Validates call arguments, collecting every violation rather than
    /// stopping at the first.
    pub fn validate(&self, args: &Value) -> Vec<String> {
        let Some(map) = args.as_object() else {
            return vec![format!(
                "arguments must be a JSON object, got {}",
                value_kind(args)
            )];
        };

        let mut violations = Vec::new();
        for param in &self.parameters {
            match map.get(param.name) {
                None if param.required => {
                    violations.push(format!("missing required parameter '{}'", param.name));
                }
                None => {}
                Some(value) if !param.kind.matches(value) => {
                    violations.push(format!(
                        "parameter '{}' expects {}, got {}",
                        param.name,
                        param.kind.name(),
                        value_kind(value)
                    ));
                }
                Some(_) => {}
            }
        }
        violations
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

//
// ================= Tool Trait =================
//

/// Trait for a single tool (deterministic execution)
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn schema(&self) -> ToolSchema;
    async fn call(&self, args: &Value) -> Result<Value>;
}

/// Discovery view of a registered tool, without the handler.
#[derive(Debug, Clone)]
pub struct ToolMetadata {
    pub name: &'static str,
    pub description: &'static str,
    pub schema: ToolSchema,
}

//
// ================= Retry Policy =================
//

/// Exponential backoff for transient handler failures. Attempt `n` failing
/// schedules a wait of `2^n * base_delay` before attempt `n + 1`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

//
// ================= Registry =================
//

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    schema: ToolSchema,
}

/// Tool registry for looking up and executing tools.
///
/// Holds no execution history; recording tool usage belongs to the decision
/// trace, driven by the calling agent.
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default(), DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_policy(retry: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            retry,
            call_timeout,
        }
    }

    /// Registers a tool. Names are unique; the schema is compiled here so a
    /// broken tool fails at startup instead of mid-request.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name();
        if self.tools.contains_key(name) {
            return Err(OrchestrationError::ToolAlreadyRegistered(name.to_string()));
        }

        let schema = tool.schema();
        schema
            .compile()
            .map_err(|reason| OrchestrationError::ToolSchemaInvalid {
                tool: name.to_string(),
                reason,
            })?;

        self.tools.insert(name.to_string(), RegisteredTool { tool, schema });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|entry| entry.tool.clone())
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Metadata for every registered tool, sorted by name, so callers can
    /// discover what is available without touching the handlers.
    pub fn metadata(&self) -> Vec<ToolMetadata> {
        let mut entries: Vec<ToolMetadata> = self
            .tools
            .values()
            .map(|entry| ToolMetadata {
                name: entry.tool.name(),
                description: entry.tool.description(),
                schema: entry.schema.clone(),
            })
            .collect();
        entries.sort_by_key(|m| m.name);
        entries
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Executes a registered tool by name.
    ///
    /// Validation failures and timeouts are terminal for the call; only
    /// other handler errors are retried, and the last one is surfaced
    /// wrapped after the attempt budget is spent. The timeout races the
    /// handler per attempt; the losing future is dropped, not cancelled
    /// cooperatively, so handlers must not rely on running to completion.
    pub async fn execute(&self, name: &str, args: &Value) -> Result<Value> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| OrchestrationError::ToolNotFound(name.to_string()))?;

        let violations = entry.schema.validate(args);
        if !violations.is_empty() {
            return Err(OrchestrationError::ToolValidation {
                tool: name.to_string(),
                violations,
            });
        }

        let mut attempt = 1;
        loop {
            match timeout(self.call_timeout, entry.tool.call(args)).await {
                Err(_elapsed) => {
                    return Err(OrchestrationError::ToolTimeout {
                        tool: name.to_string(),
                        timeout_ms: self.call_timeout.as_millis() as u64,
                    });
                }
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        debug!(tool = name, attempt, "tool call succeeded after retry");
                    }
                    return Ok(value);
                }
                // Handler-raised validation errors are as terminal as
                // registry-level ones.
                Ok(Err(err @ OrchestrationError::ToolValidation { .. })) => {
                    return Err(err);
                }
                Ok(Err(err)) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(OrchestrationError::ToolExecution {
                            tool: name.to_string(),
                            attempts: attempt,
                            source_message: err.to_string(),
                        });
                    }
                    let delay = self.retry.backoff_delay(attempt);
                    warn!(
                        tool = name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "tool call failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_registry() -> ToolRegistry {
        ToolRegistry::with_policy(
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
            Duration::from_millis(100),
        )
    }

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn description(&self) -> &'static str {
            "Returns its input"
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema::new(vec![ParameterSpec::required(
                "value",
                ParamKind::String,
                "Value to echo back",
            )])
        }

        async fn call(&self, args: &Value) -> Result<Value> {
            Ok(json!({ "echoed": args["value"] }))
        }
    }

    /// Fails the first `fail_times` calls, then succeeds.
    struct FlakyTool {
        fail_times: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn description(&self) -> &'static str {
            "Fails transiently"
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema::empty()
        }

        async fn call(&self, _args: &Value) -> Result<Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_times {
                Err(OrchestrationError::Retrieval(
                    "connection refused".to_string(),
                ))
            } else {
                Ok(json!({ "attempt": n }))
            }
        }
    }

    struct SlowTool;

    #[async_trait::async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn description(&self) -> &'static str {
            "Never finishes in time"
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema::empty()
        }

        async fn call(&self, _args: &Value) -> Result<Value> {
            sleep(Duration::from_secs(5)).await;
            Ok(json!({}))
        }
    }

    /// Counts invocations so tests can assert the handler never ran.
    struct CountingTool {
        calls: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn description(&self) -> &'static str {
            "Counts calls"
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema::new(vec![ParameterSpec::required(
                "principal",
                ParamKind::Number,
                "Loan principal",
            )])
        }

        async fn call(&self, _args: &Value) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({}))
        }
    }

    struct RejectingTool {
        calls: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl Tool for RejectingTool {
        fn name(&self) -> &'static str {
            "rejecting"
        }

        fn description(&self) -> &'static str {
            "Raises a validation error from inside the handler"
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema::empty()
        }

        async fn call(&self, _args: &Value) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(OrchestrationError::ToolValidation {
                tool: "rejecting".to_string(),
                violations: vec!["tenure must be positive".to_string()],
            })
        }
    }

    #[tokio::test]
    async fn executes_registered_tool() {
        let mut registry = fast_registry();
        registry.register(Arc::new(EchoTool)).unwrap();

        let out = registry
            .execute("echo", &json!({ "value": "hello" }))
            .await
            .unwrap();
        assert_eq!(out["echoed"], "hello");
    }

    #[tokio::test]
    async fn unknown_tool_fails_with_not_found() {
        let registry = fast_registry();
        let err = registry.execute("nope", &json!({})).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = fast_registry();
        registry
            .register(Arc::new(FlakyTool {
                fail_times: 2,
                calls: calls.clone(),
            }))
            .unwrap();

        let out = registry.execute("flaky", &json!({})).await.unwrap();
        assert_eq!(out["attempt"], 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_stop_after_three_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = fast_registry();
        registry
            .register(Arc::new(FlakyTool {
                fail_times: 10,
                calls: calls.clone(),
            }))
            .unwrap();

        let err = registry.execute("flaky", &json!({})).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            OrchestrationError::ToolExecution { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected ToolExecution, got {other:?}"),
        }
    }

    #[test]
    fn default_backoff_schedule_doubles_from_two_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn validation_failure_never_invokes_handler() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = fast_registry();
        registry
            .register(Arc::new(CountingTool { calls: calls.clone() }))
            .unwrap();

        let err = registry
            .execute("counting", &json!({ "principal": "not a number" }))
            .await
            .unwrap_err();
        match err {
            OrchestrationError::ToolValidation { violations, .. } => {
                assert_eq!(violations.len(), 1);
                assert!(violations[0].contains("principal"));
            }
            other => panic!("expected ToolValidation, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_and_mistyped_args_are_both_reported() {
        let mut registry = fast_registry();
        registry.register(Arc::new(EchoTool)).unwrap();

        let err = registry.execute("echo", &json!({})).await.unwrap_err();
        match err {
            OrchestrationError::ToolValidation { violations, .. } => {
                assert!(violations[0].contains("missing required parameter 'value'"));
            }
            other => panic!("expected ToolValidation, got {other:?}"),
        }

        let err = registry.execute("echo", &json!([1, 2])).await.unwrap_err();
        match err {
            OrchestrationError::ToolValidation { violations, .. } => {
                assert!(violations[0].contains("must be a JSON object"));
            }
            other => panic!("expected ToolValidation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeouts_are_not_retried() {
        let mut registry = fast_registry();
        registry.register(Arc::new(SlowTool)).unwrap();

        let err = registry.execute("slow", &json!({})).await.unwrap_err();
        match err {
            OrchestrationError::ToolTimeout { timeout_ms, .. } => assert_eq!(timeout_ms, 100),
            other => panic!("expected ToolTimeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn handler_raised_validation_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = fast_registry();
        registry
            .register(Arc::new(RejectingTool { calls: calls.clone() }))
            .unwrap();

        let err = registry.execute("rejecting", &json!({})).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::ToolValidation { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = fast_registry();
        registry.register(Arc::new(EchoTool)).unwrap();

        let err = registry.register(Arc::new(EchoTool)).unwrap_err();
        assert!(matches!(err, OrchestrationError::ToolAlreadyRegistered(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn metadata_lists_registered_tools_sorted() {
        let mut registry = fast_registry();
        registry
            .register(Arc::new(FlakyTool {
                fail_times: 0,
                calls: Arc::new(AtomicU32::new(0)),
            }))
            .unwrap();
        registry.register(Arc::new(EchoTool)).unwrap();

        let metadata = registry.metadata();
        let names: Vec<&str> = metadata.iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["echo", "flaky"]);

        let echo = &metadata[0];
        assert_eq!(echo.description, "Returns its input");
        assert_eq!(echo.schema.parameters.len(), 1);
        assert_eq!(echo.schema.parameters[0].name, "value");
    }

    #[test]
    fn schema_with_duplicate_parameters_is_rejected_at_registration() {
        struct BadSchemaTool;

        #[async_trait::async_trait]
        impl Tool for BadSchemaTool {
            fn name(&self) -> &'static str {
                "bad_schema"
            }

            fn description(&self) -> &'static str {
                "Schema declares the same parameter twice"
            }

            fn schema(&self) -> ToolSchema {
                ToolSchema::new(vec![
                    ParameterSpec::required("x", ParamKind::Number, "first"),
                    ParameterSpec::optional("x", ParamKind::String, "second"),
                ])
            }

            async fn call(&self, _args: &Value) -> Result<Value> {
                Ok(json!({}))
            }
        }

        let mut registry = fast_registry();
        let err = registry.register(Arc::new(BadSchemaTool)).unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::ToolSchemaInvalid { .. }
        ));
        assert!(registry.is_empty());
    }
}
