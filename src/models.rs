//! Core data models for the multi-agent orchestration engine

use crate::context::TaskContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

//
// ================= Agent Types =================
//

/// Closed set of agents known to the system. Used as a map key everywhere;
/// matches on this enum must stay exhaustive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Orchestrator,
    FinancialPlanning,
    RiskAssessment,
    InvestmentAdvisor,
    Simulation,
    FinancialGraph,
    ActionExecution,
    MonitoringAlerting,
}

impl AgentType {
    /// Every specialized agent (everything except the orchestrator itself).
    pub const SPECIALIZED: &'static [AgentType] = &[
        AgentType::FinancialPlanning,
        AgentType::RiskAssessment,
        AgentType::InvestmentAdvisor,
        AgentType::Simulation,
        AgentType::FinancialGraph,
        AgentType::ActionExecution,
        AgentType::MonitoringAlerting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Orchestrator => "orchestrator",
            AgentType::FinancialPlanning => "financial_planning",
            AgentType::RiskAssessment => "risk_assessment",
            AgentType::InvestmentAdvisor => "investment_advisor",
            AgentType::Simulation => "simulation",
            AgentType::FinancialGraph => "financial_graph",
            AgentType::ActionExecution => "action_execution",
            AgentType::MonitoringAlerting => "monitoring_alerting",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//
// ================= Agent Messages =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Request,
    Response,
    Notification,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub task: String,
    pub context: TaskContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<TaskContext>,
}

/// A message routed between agents. Immutable once constructed; context
/// enrichment between steps clones rather than mutating in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: Uuid,
    pub from: AgentType,
    pub to: Vec<AgentType>,
    pub kind: MessageKind,
    pub payload: MessagePayload,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<Uuid>,
}

impl AgentMessage {
    pub fn request(
        from: AgentType,
        to: Vec<AgentType>,
        task: impl Into<String>,
        context: TaskContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from,
            to,
            kind: MessageKind::Request,
            payload: MessagePayload {
                task: task.into(),
                context,
                constraints: None,
            },
            timestamp: Utc::now(),
            parent_message_id: None,
        }
    }

    pub fn with_constraints(mut self, constraints: TaskContext) -> Self {
        self.payload.constraints = Some(constraints);
        self
    }

    pub fn with_parent(mut self, parent: Uuid) -> Self {
        self.parent_message_id = Some(parent);
        self
    }

    /// Follow-up request carrying an enriched context, linked to this message.
    pub fn derive(&self, to: Vec<AgentType>, task: impl Into<String>, context: TaskContext) -> Self {
        AgentMessage::request(self.from, to, task, context).with_parent(self.id)
    }
}

//
// ================= Agent Responses =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

/// The single response shape every agent returns. Invariants are enforced by
/// the constructors: `failure` always populates `error`, `success` never does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,
    pub result: Value,
    pub reasoning: Vec<String>,
    pub confidence: f64,
    pub tools_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_actions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AgentErrorInfo>,
}

impl AgentResponse {
    pub fn success(
        result: Value,
        reasoning: Vec<String>,
        tools_used: Vec<String>,
        confidence: f64,
    ) -> Self {
        Self {
            success: true,
            result,
            reasoning,
            confidence: confidence.clamp(0.0, 1.0),
            tools_used,
            next_actions: None,
            error: None,
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>, details: Value) -> Self {
        Self {
            success: false,
            result: Value::Null,
            reasoning: Vec::new(),
            confidence: 0.0,
            tools_used: Vec::new(),
            next_actions: None,
            error: Some(AgentErrorInfo {
                code: code.into(),
                message: message.into(),
                details,
            }),
        }
    }

    pub fn with_next_actions(mut self, actions: Vec<String>) -> Self {
        self.next_actions = Some(actions);
        self
    }

    pub fn with_reasoning(mut self, reasoning: Vec<String>) -> Self {
        self.reasoning = reasoning;
        self
    }

    /// True for a failed response whose error was flagged recoverable.
    pub fn is_recoverable_failure(&self) -> bool {
        !self.success
            && self
                .error
                .as_ref()
                .and_then(|e| e.details.get("recoverable"))
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }
}

//
// ================= Execution Plans =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_id: String,
    pub agent_type: AgentType,
    pub task: String,
    pub dependencies: Vec<String>,
    pub timeout_ms: u64,
    pub retry_on_failure: bool,
    pub max_retries: u32,
}

impl ExecutionStep {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub total_steps: usize,
    pub execution_mode: ExecutionMode,
    pub estimated_duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub steps: Vec<ExecutionStep>,
    pub context: TaskContext,
    pub metadata: PlanMetadata,
}

/// Outcome of `validate_plan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

//
// ================= Decision Traces =================
//

/// One recorded agent execution inside a trace. Rows are unique per
/// (trace, agent, attempt) so concurrent steps never clobber each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTraceStep {
    pub agent: AgentType,
    pub attempt: u32,
    pub input: Value,
    pub output: Value,
    pub reasoning: Vec<String>,
    pub tools_used: Vec<String>,
    pub success: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Durable record of one orchestration request. Append-only while the
/// request runs, immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTrace {
    pub trace_id: Uuid,
    pub user_id: Option<Uuid>,
    pub query: String,
    pub steps: Vec<DecisionTraceStep>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl DecisionTrace {
    pub fn new(trace_id: Uuid, user_id: Option<Uuid>, query: impl Into<String>) -> Self {
        Self {
            trace_id,
            user_id,
            query: query.into(),
            steps: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            success: true,
            feedback: None,
        }
    }

    /// True when every agent's latest attempt succeeded (and for an empty
    /// trace). An attempt superseded by a retry does not count against the
    /// trace.
    pub fn overall_success(&self) -> bool {
        let mut latest: HashMap<AgentType, (u32, bool)> = HashMap::new();
        for step in &self.steps {
            let slot = latest
                .entry(step.agent)
                .or_insert((step.attempt, step.success));
            if step.attempt >= slot.0 {
                *slot = (step.attempt, step.success);
            }
        }
        latest.values().all(|(_, success)| *success)
    }
}

/// Aggregated execution statistics for one agent type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPerformance {
    pub agent_type: AgentType,
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub avg_duration_ms: f64,
    pub avg_confidence: f64,
}

//
// ================= Public Surface =================
//

/// What `orchestrate` hands back to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationOutcome {
    pub trace_id: Uuid,
    pub result: Value,
    pub confidence: f64,
}

/// Caller-supplied context for one orchestration request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub attributes: TaskContext,
}

impl UserContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            attributes: TaskContext::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_response_clamps_confidence() {
        let high = AgentResponse::success(Value::Null, vec![], vec![], 1.5);
        assert_eq!(high.confidence, 1.0);

        let low = AgentResponse::success(Value::Null, vec![], vec![], -0.3);
        assert_eq!(low.confidence, 0.0);
    }

    #[test]
    fn failure_response_populates_error() {
        let resp = AgentResponse::failure("SOME_CODE", "it broke", Value::Null);
        assert!(!resp.success);
        assert!(resp.result.is_null());
        let err = resp.error.expect("failure must carry error info");
        assert_eq!(err.code, "SOME_CODE");
    }

    #[test]
    fn success_response_has_no_error() {
        let resp = AgentResponse::success(serde_json::json!({"ok": true}), vec![], vec![], 0.9);
        assert!(resp.success);
        assert!(resp.error.is_none());
    }

    #[test]
    fn agent_type_round_trips_through_serde() {
        for agent in AgentType::SPECIALIZED {
            let json = serde_json::to_string(agent).unwrap();
            assert_eq!(json.trim_matches('"'), agent.as_str());
            let back: AgentType = serde_json::from_str(&json).unwrap();
            assert_eq!(back, *agent);
        }
    }

    #[test]
    fn trace_success_follows_each_agents_latest_attempt() {
        let mut trace = DecisionTrace::new(Uuid::new_v4(), None, "test query");
        assert!(trace.overall_success());

        trace.steps.push(DecisionTraceStep {
            agent: AgentType::RiskAssessment,
            attempt: 1,
            input: Value::Null,
            output: Value::Null,
            reasoning: vec![],
            tools_used: vec![],
            success: true,
            duration_ms: 10,
            timestamp: Utc::now(),
            error: None,
        });
        assert!(trace.overall_success());

        trace.steps.push(DecisionTraceStep {
            agent: AgentType::Simulation,
            attempt: 1,
            input: Value::Null,
            output: Value::Null,
            reasoning: vec![],
            tools_used: vec![],
            success: false,
            duration_ms: 5,
            timestamp: Utc::now(),
            error: Some("boom".to_string()),
        });
        assert!(!trace.overall_success());

        // A retry that succeeds supersedes the failed attempt.
        trace.steps.push(DecisionTraceStep {
            agent: AgentType::Simulation,
            attempt: 2,
            input: Value::Null,
            output: Value::Null,
            reasoning: vec![],
            tools_used: vec![],
            success: true,
            duration_ms: 7,
            timestamp: Utc::now(),
            error: None,
        });
        assert!(trace.overall_success());
    }
}
