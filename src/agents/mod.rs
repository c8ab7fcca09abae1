//! Agent contract and the shared services agents execute with
//!
//! Agents never surface errors through their return type. `execute`
//! always resolves to an [`AgentResponse`]; failures become structured
//! failure responses carrying an error code, a recoverability flag, and
//! suggested next actions so the orchestrator can decide whether to
//! retry or move on.

pub mod action_execution;
pub mod financial_graph;
pub mod financial_planning;
pub mod investment_advisor;
pub mod monitoring;
pub mod registry;
pub mod risk_assessment;
pub mod simulation;

pub use registry::AgentRegistry;

use crate::error::OrchestrationError;
use crate::models::{AgentMessage, AgentResponse, AgentType};
use crate::tools::ToolRegistry;
use crate::trace::DecisionTraceService;
use crate::Result;
use serde_json::{json, Value};
use std::io::ErrorKind;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Contract every specialized agent implements.
#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    fn agent_type(&self) -> AgentType;

    /// Whether this agent recognizes the given task name.
    fn can_handle(&self, task: &str) -> bool;

    /// Handles one message. Must not panic or error; failures are
    /// reported through the response itself.
    async fn execute(&self, message: &AgentMessage) -> AgentResponse;
}

impl std::fmt::Debug for dyn Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Agent").field(&self.agent_type()).finish()
    }
}

//
// ================= Shared Services =================
//

/// Handles shared by all agents: the tool registry and the decision
/// trace. Cloning is cheap.
#[derive(Clone)]
pub struct AgentServices {
    tools: Arc<ToolRegistry>,
    trace: Arc<DecisionTraceService>,
}

impl AgentServices {
    pub fn new(tools: Arc<ToolRegistry>, trace: Arc<DecisionTraceService>) -> Self {
        Self { tools, trace }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn trace(&self) -> &DecisionTraceService {
        &self.trace
    }

    /// Runs a registered tool. A failure is recorded on the live trace
    /// before being handed back to the caller.
    pub async fn call_tool(
        &self,
        agent: AgentType,
        trace_id: Option<Uuid>,
        tool: &str,
        args: &Value,
    ) -> Result<Value> {
        match self.tools.execute(tool, args).await {
            Ok(output) => Ok(output),
            Err(error) => {
                if let Some(trace_id) = trace_id {
                    if let Err(trace_error) = self
                        .trace
                        .append_error(trace_id, agent, &error.to_string())
                        .await
                    {
                        warn!(%trace_error, "failed to record tool failure on trace");
                    }
                }
                Err(error)
            }
        }
    }

    /// Logs a reasoning line, persists it to the live trace (best
    /// effort), and appends it to the agent's local trail.
    pub async fn reason(
        &self,
        agent: AgentType,
        trace_id: Option<Uuid>,
        trail: &mut Vec<String>,
        line: impl Into<String>,
    ) {
        let line = line.into();
        debug!(agent = %agent, reasoning = %line, "agent reasoning");
        if let Some(trace_id) = trace_id {
            if let Err(error) = self.trace.append_reasoning(trace_id, agent, &line).await {
                debug!(%error, "failed to persist reasoning line");
            }
        }
        trail.push(line);
    }
}

//
// ================= Failure Handling =================
//

/// Transient conditions worth retrying: timeouts, refused connections,
/// and argument validation problems the caller can correct.
pub fn is_recoverable(error: &OrchestrationError) -> bool {
    match error {
        OrchestrationError::ToolTimeout { .. } | OrchestrationError::ToolValidation { .. } => true,
        OrchestrationError::Http(e) => e.is_timeout() || e.is_connect(),
        OrchestrationError::Io(e) => matches!(
            e.kind(),
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::TimedOut
        ),
        OrchestrationError::ToolExecution { source_message, .. } => {
            let lowered = source_message.to_lowercase();
            lowered.contains("connection refused")
                || lowered.contains("timed out")
                || lowered.contains("timeout")
                || lowered.contains("temporarily unavailable")
        }
        _ => false,
    }
}

fn recovery_suggestions(error: &OrchestrationError) -> Vec<String> {
    match error {
        OrchestrationError::ToolTimeout { tool, .. } => vec![
            format!("retry {} with a longer timeout", tool),
            "reduce the request scope and try again".to_string(),
        ],
        OrchestrationError::ToolValidation { tool, .. } => {
            vec![format!("correct the arguments for {} and retry", tool)]
        }
        _ => vec![
            "retry after a short delay".to_string(),
            "check downstream service availability".to_string(),
        ],
    }
}

/// Converts an error into a failure response. Recoverable errors carry
/// recovery suggestions; everything else suggests escalation.
pub fn handle_error(agent: AgentType, task: &str, error: &OrchestrationError) -> AgentResponse {
    let recoverable = is_recoverable(error);
    warn!(
        agent = %agent,
        task,
        code = error.code(),
        recoverable,
        error = %error,
        "agent step failed"
    );

    let next_actions = if recoverable {
        recovery_suggestions(error)
    } else {
        vec!["escalate to the orchestrator for replanning".to_string()]
    };

    AgentResponse::failure(
        error.code(),
        error.to_string(),
        json!({
            "agent": agent.as_str(),
            "task": task,
            "recoverable": recoverable,
        }),
    )
    .with_next_actions(next_actions)
}

//
// ================= Default Roster =================
//

/// Create a registry with every specialized agent wired over the same
/// shared services.
pub fn create_default_registry(services: AgentServices) -> Result<AgentRegistry> {
    let mut registry = AgentRegistry::new();

    registry.register(Arc::new(financial_planning::FinancialPlanningAgent::new(
        services.clone(),
    )))?;
    registry.register(Arc::new(risk_assessment::RiskAssessmentAgent::new(
        services.clone(),
    )))?;
    registry.register(Arc::new(investment_advisor::InvestmentAdvisorAgent::new(
        services.clone(),
    )))?;
    registry.register(Arc::new(simulation::SimulationAgent::new(services.clone())))?;
    registry.register(Arc::new(financial_graph::FinancialGraphAgent::new(
        services.clone(),
    )))?;
    registry.register(Arc::new(action_execution::ActionExecutionAgent::new(
        services.clone(),
    )))?;
    registry.register(Arc::new(monitoring::MonitoringAlertingAgent::new(services)))?;

    Ok(registry)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Scripted stand-in for a specialized agent. Fails its first
    /// `fail_times` executions, optionally after a fixed delay.
    pub(crate) struct ScriptedAgent {
        kind: AgentType,
        delay_ms: u64,
        confidence: f64,
        fail_times: u32,
        recoverable_failures: bool,
        calls: Arc<AtomicU32>,
    }

    impl ScriptedAgent {
        pub(crate) fn new(kind: AgentType) -> Self {
            Self {
                kind,
                delay_ms: 0,
                confidence: 0.9,
                fail_times: 0,
                recoverable_failures: true,
                calls: Arc::new(AtomicU32::new(0)),
            }
        }

        pub(crate) fn delayed(kind: AgentType, delay_ms: u64) -> Self {
            Self {
                delay_ms,
                ..Self::new(kind)
            }
        }

        pub(crate) fn failing(kind: AgentType) -> Self {
            Self {
                fail_times: u32::MAX,
                ..Self::new(kind)
            }
        }

        pub(crate) fn flaky(kind: AgentType, fail_times: u32) -> Self {
            Self {
                fail_times,
                ..Self::new(kind)
            }
        }

        pub(crate) fn with_confidence(mut self, confidence: f64) -> Self {
            self.confidence = confidence;
            self
        }

        pub(crate) fn unrecoverable(mut self) -> Self {
            self.recoverable_failures = false;
            self
        }

        pub(crate) fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn calls_handle(&self) -> Arc<AtomicU32> {
            Arc::clone(&self.calls)
        }
    }

    #[async_trait::async_trait]
    impl Agent for ScriptedAgent {
        fn agent_type(&self) -> AgentType {
            self.kind
        }

        fn can_handle(&self, _task: &str) -> bool {
            true
        }

        async fn execute(&self, message: &AgentMessage) -> AgentResponse {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }

            if call < self.fail_times {
                return AgentResponse::failure(
                    "AGENT_EXECUTION_ERROR",
                    format!("{} scripted failure", self.kind),
                    json!({
                        "agent": self.kind.as_str(),
                        "recoverable": self.recoverable_failures,
                    }),
                );
            }

            let seen_keys: Vec<String> = message
                .payload
                .context
                .iter()
                .map(|(k, _)| k.clone())
                .collect();

            AgentResponse::success(
                json!({
                    "agent": self.kind.as_str(),
                    "task": message.payload.task,
                    "seen_keys": seen_keys,
                }),
                vec![format!("{} handled {}", self.kind, message.payload.task)],
                Vec::new(),
                self.confidence,
            )
        }
    }

    #[test]
    fn timeouts_and_validation_are_recoverable() {
        let timeout = OrchestrationError::ToolTimeout {
            tool: "risk_score".to_string(),
            timeout_ms: 100,
        };
        assert!(is_recoverable(&timeout));

        let validation = OrchestrationError::ToolValidation {
            tool: "calculate_emi".to_string(),
            violations: vec!["principal must be positive".to_string()],
        };
        assert!(is_recoverable(&validation));

        let refused = OrchestrationError::ToolExecution {
            tool: "project_growth".to_string(),
            attempts: 3,
            source_message: "connection refused by upstream".to_string(),
        };
        assert!(is_recoverable(&refused));
    }

    #[test]
    fn missing_tools_are_not_recoverable() {
        let err = OrchestrationError::ToolNotFound("no_such_tool".to_string());
        assert!(!is_recoverable(&err));

        let response = handle_error(AgentType::Simulation, "run_projection", &err);
        assert!(!response.success);
        let error = response.error.as_ref().unwrap();
        assert_eq!(error.code, "TOOL_NOT_FOUND");
        assert_eq!(error.details["recoverable"], json!(false));
        let actions = response.next_actions.as_ref().unwrap();
        assert!(actions[0].contains("escalate"));
    }

    #[test]
    fn recoverable_failures_carry_recovery_suggestions() {
        let err = OrchestrationError::ToolTimeout {
            tool: "risk_score".to_string(),
            timeout_ms: 15_000,
        };
        let response = handle_error(AgentType::RiskAssessment, "assess_overall_risk", &err);

        assert!(!response.success);
        assert!(response.is_recoverable_failure());
        let actions = response.next_actions.as_ref().unwrap();
        assert!(actions.iter().any(|a| a.contains("retry")));
    }

    #[tokio::test]
    async fn tool_failures_are_recorded_on_the_trace() {
        let services = AgentServices::new(
            Arc::new(ToolRegistry::new()),
            Arc::new(DecisionTraceService::in_memory()),
        );
        let trace_id = Uuid::new_v4();
        let agent = AgentType::FinancialPlanning;

        services
            .trace()
            .start_trace(trace_id, None, "q")
            .await
            .unwrap();
        services
            .trace()
            .start_step(trace_id, agent, 1, Value::Null)
            .await
            .unwrap();

        let err = services
            .call_tool(agent, Some(trace_id), "missing_tool", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::ToolNotFound(_)));

        let bare = AgentResponse::success(json!({}), vec![], vec![], 0.5);
        services
            .trace()
            .complete_step(trace_id, agent, 1, &bare, Duration::from_millis(1))
            .await
            .unwrap();

        let trace = services.trace().get_trace(trace_id).await.unwrap();
        let recorded = trace.steps[0].error.as_deref().unwrap();
        assert!(recorded.contains("missing_tool"));
    }

    #[test]
    fn default_roster_covers_every_specialized_agent() {
        let services = AgentServices::new(
            Arc::new(crate::tools::builtin::create_default_registry().unwrap()),
            Arc::new(DecisionTraceService::in_memory()),
        );
        let registry = create_default_registry(services).unwrap();

        assert_eq!(registry.len(), AgentType::SPECIALIZED.len());
        for kind in AgentType::SPECIALIZED {
            assert!(registry.contains(*kind), "missing {}", kind);
        }
    }
}
