//! Decision trace recording and analytics
//!
//! Every agent execution is recorded to a trace keyed by the request's
//! trace id, so a full orchestration can be replayed and audited after the
//! fact. Steps are created when an agent starts and updated when it
//! resolves; one row per (trace, agent, attempt) keeps concurrent steps
//! from clobbering each other.

mod pg;

pub use pg::PgTraceStore;

use crate::error::OrchestrationError;
use crate::models::{AgentPerformance, AgentResponse, AgentType, DecisionTrace, DecisionTraceStep};
use crate::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of one finished step, applied to the row created at start.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub output: Value,
    pub reasoning: Vec<String>,
    pub tools_used: Vec<String>,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Trait for trace persistence
#[async_trait::async_trait]
pub trait TraceStore: Send + Sync {
    async fn create_trace(&self, trace: DecisionTrace) -> Result<()>;
    async fn start_step(
        &self,
        trace_id: Uuid,
        agent: AgentType,
        attempt: u32,
        input: Value,
    ) -> Result<()>;
    async fn finish_step(
        &self,
        trace_id: Uuid,
        agent: AgentType,
        attempt: u32,
        outcome: StepOutcome,
    ) -> Result<()>;
    async fn append_reasoning(&self, trace_id: Uuid, agent: AgentType, line: String) -> Result<()>;
    async fn append_error(&self, trace_id: Uuid, agent: AgentType, error: String) -> Result<()>;
    async fn complete_trace(&self, trace_id: Uuid) -> Result<()>;
    async fn get_trace(&self, trace_id: Uuid) -> Result<Option<DecisionTrace>>;
    async fn recent_trace_ids(&self, user_id: Uuid, limit: usize) -> Result<Vec<Uuid>>;
    async fn record_feedback(&self, trace_id: Uuid, feedback: String) -> Result<()>;
    async fn agent_metrics(&self) -> Result<Vec<AgentPerformance>>;
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

//
// ================= In-Memory Store =================
//

#[derive(Debug, Clone)]
struct PendingStep {
    input: Value,
    started_at: DateTime<Utc>,
    reasoning: Vec<String>,
    error: Option<String>,
}

/// In-memory trace store for development and tests.
pub struct InMemoryTraceStore {
    traces: Arc<RwLock<HashMap<Uuid, DecisionTrace>>>,
    pending: Arc<RwLock<HashMap<(Uuid, AgentType, u32), PendingStep>>>,
}

impl InMemoryTraceStore {
    pub fn new() -> Self {
        Self {
            traces: Arc::new(RwLock::new(HashMap::new())),
            pending: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Latest pending attempt for (trace, agent), if any.
    async fn latest_pending_attempt(&self, trace_id: Uuid, agent: AgentType) -> Option<u32> {
        let pending = self.pending.read().await;
        pending
            .keys()
            .filter(|(t, a, _)| *t == trace_id && *a == agent)
            .map(|(_, _, attempt)| *attempt)
            .max()
    }
}

impl Default for InMemoryTraceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TraceStore for InMemoryTraceStore {
    async fn create_trace(&self, trace: DecisionTrace) -> Result<()> {
        let mut traces = self.traces.write().await;
        traces.entry(trace.trace_id).or_insert(trace);
        Ok(())
    }

    async fn start_step(
        &self,
        trace_id: Uuid,
        agent: AgentType,
        attempt: u32,
        input: Value,
    ) -> Result<()> {
        let mut pending = self.pending.write().await;
        pending.insert(
            (trace_id, agent, attempt),
            PendingStep {
                input,
                started_at: Utc::now(),
                reasoning: Vec::new(),
                error: None,
            },
        );
        Ok(())
    }

    async fn finish_step(
        &self,
        trace_id: Uuid,
        agent: AgentType,
        attempt: u32,
        outcome: StepOutcome,
    ) -> Result<()> {
        let started = {
            let mut pending = self.pending.write().await;
            pending.remove(&(trace_id, agent, attempt))
        }
        .unwrap_or(PendingStep {
            input: Value::Null,
            started_at: Utc::now(),
            reasoning: Vec::new(),
            error: None,
        });

        // The response's reasoning supersedes live appends when present.
        let reasoning = if outcome.reasoning.is_empty() {
            started.reasoning
        } else {
            outcome.reasoning
        };

        let step = DecisionTraceStep {
            agent,
            attempt,
            input: started.input,
            output: outcome.output,
            reasoning,
            tools_used: outcome.tools_used,
            success: outcome.success,
            duration_ms: outcome.duration_ms,
            timestamp: started.started_at,
            error: outcome.error.or(started.error),
        };

        let mut traces = self.traces.write().await;
        match traces.get_mut(&trace_id) {
            Some(trace) => trace.steps.push(step),
            None => warn!(%trace_id, "finished step for unknown trace, dropping"),
        }
        Ok(())
    }

    async fn append_reasoning(&self, trace_id: Uuid, agent: AgentType, line: String) -> Result<()> {
        if let Some(attempt) = self.latest_pending_attempt(trace_id, agent).await {
            let mut pending = self.pending.write().await;
            if let Some(step) = pending.get_mut(&(trace_id, agent, attempt)) {
                step.reasoning.push(line);
            }
            return Ok(());
        }

        // Step already finished; append to its recorded row.
        let mut traces = self.traces.write().await;
        if let Some(trace) = traces.get_mut(&trace_id) {
            if let Some(step) = trace
                .steps
                .iter_mut()
                .rev()
                .find(|step| step.agent == agent)
            {
                step.reasoning.push(line);
            }
        }
        Ok(())
    }

    async fn append_error(&self, trace_id: Uuid, agent: AgentType, error: String) -> Result<()> {
        if let Some(attempt) = self.latest_pending_attempt(trace_id, agent).await {
            let mut pending = self.pending.write().await;
            if let Some(step) = pending.get_mut(&(trace_id, agent, attempt)) {
                step.error = Some(error);
            }
            return Ok(());
        }

        let mut traces = self.traces.write().await;
        if let Some(trace) = traces.get_mut(&trace_id) {
            if let Some(step) = trace
                .steps
                .iter_mut()
                .rev()
                .find(|step| step.agent == agent)
            {
                step.error = Some(error);
            }
        }
        Ok(())
    }

    async fn complete_trace(&self, trace_id: Uuid) -> Result<()> {
        let mut traces = self.traces.write().await;
        if let Some(trace) = traces.get_mut(&trace_id) {
            trace.completed_at = Some(Utc::now());
            trace.success = trace.overall_success();
        }
        Ok(())
    }

    async fn get_trace(&self, trace_id: Uuid) -> Result<Option<DecisionTrace>> {
        let traces = self.traces.read().await;
        Ok(traces.get(&trace_id).cloned())
    }

    async fn recent_trace_ids(&self, user_id: Uuid, limit: usize) -> Result<Vec<Uuid>> {
        let traces = self.traces.read().await;
        let mut items: Vec<_> = traces
            .values()
            .filter(|trace| trace.user_id == Some(user_id))
            .map(|trace| (trace.trace_id, trace.started_at))
            .collect();
        items.sort_by_key(|(_, started_at)| std::cmp::Reverse(*started_at));
        Ok(items.into_iter().take(limit).map(|(id, _)| id).collect())
    }

    async fn record_feedback(&self, trace_id: Uuid, feedback: String) -> Result<()> {
        let mut traces = self.traces.write().await;
        match traces.get_mut(&trace_id) {
            Some(trace) => {
                trace.feedback = Some(feedback);
                Ok(())
            }
            None => Err(OrchestrationError::TraceNotFound(trace_id.to_string())),
        }
    }

    async fn agent_metrics(&self) -> Result<Vec<AgentPerformance>> {
        let traces = self.traces.read().await;

        struct Accum {
            executions: u64,
            successes: u64,
            total_duration_ms: u64,
            total_confidence: f64,
        }

        let mut by_agent: HashMap<AgentType, Accum> = HashMap::new();
        for trace in traces.values() {
            for step in &trace.steps {
                let entry = by_agent.entry(step.agent).or_insert(Accum {
                    executions: 0,
                    successes: 0,
                    total_duration_ms: 0,
                    total_confidence: 0.0,
                });
                entry.executions += 1;
                if step.success {
                    entry.successes += 1;
                }
                entry.total_duration_ms += step.duration_ms;
                entry.total_confidence += step
                    .output
                    .get("confidence")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
            }
        }

        let mut metrics: Vec<AgentPerformance> = by_agent
            .into_iter()
            .map(|(agent_type, accum)| AgentPerformance {
                agent_type,
                executions: accum.executions,
                successes: accum.successes,
                failures: accum.executions - accum.successes,
                avg_duration_ms: accum.total_duration_ms as f64 / accum.executions as f64,
                avg_confidence: accum.total_confidence / accum.executions as f64,
            })
            .collect();
        metrics.sort_by_key(|m| m.agent_type.as_str());
        Ok(metrics)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut traces = self.traces.write().await;
        let before = traces.len();
        traces.retain(|_, trace| trace.started_at >= cutoff);
        Ok((before - traces.len()) as u64)
    }
}

//
// ================= Service =================
//

/// Decision trace service consumed by agents and the orchestrator.
pub struct DecisionTraceService {
    store: Arc<dyn TraceStore>,
}

impl DecisionTraceService {
    pub fn new(store: Arc<dyn TraceStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryTraceStore::new()))
    }

    /// Picks Postgres when a database URL is configured and reachable at
    /// pool construction, otherwise falls back to the in-memory store.
    pub fn from_env() -> Self {
        let database_url = env::var("POSTGRES_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .ok();

        if let Some(url) = database_url {
            match PgTraceStore::connect_lazy(&url) {
                Ok(store) => {
                    info!("decision trace backend: postgres");
                    return Self::new(Arc::new(store));
                }
                Err(error) => {
                    warn!(%error, "postgres trace backend unavailable, falling back to in-memory");
                }
            }
        }

        info!("decision trace backend: in-memory");
        Self::in_memory()
    }

    pub fn generate_trace_id() -> Uuid {
        Uuid::new_v4()
    }

    pub async fn start_trace(
        &self,
        trace_id: Uuid,
        user_id: Option<Uuid>,
        query: &str,
    ) -> Result<()> {
        self.store
            .create_trace(DecisionTrace::new(trace_id, user_id, query))
            .await
    }

    pub async fn start_step(
        &self,
        trace_id: Uuid,
        agent: AgentType,
        attempt: u32,
        input: Value,
    ) -> Result<()> {
        debug!(%trace_id, agent = %agent, attempt, "step started");
        self.store.start_step(trace_id, agent, attempt, input).await
    }

    pub async fn complete_step(
        &self,
        trace_id: Uuid,
        agent: AgentType,
        attempt: u32,
        response: &AgentResponse,
        duration: Duration,
    ) -> Result<()> {
        debug!(
            %trace_id,
            agent = %agent,
            attempt,
            success = response.success,
            "step completed"
        );
        let outcome = StepOutcome {
            output: serde_json::to_value(response)?,
            reasoning: response.reasoning.clone(),
            tools_used: response.tools_used.clone(),
            success: response.success,
            duration_ms: duration.as_millis() as u64,
            error: response.error.as_ref().map(|e| e.message.clone()),
        };
        self.store.finish_step(trace_id, agent, attempt, outcome).await
    }

    pub async fn fail_step(
        &self,
        trace_id: Uuid,
        agent: AgentType,
        attempt: u32,
        error: &str,
        duration: Duration,
    ) -> Result<()> {
        debug!(%trace_id, agent = %agent, attempt, error, "step failed");
        let outcome = StepOutcome {
            output: Value::Null,
            reasoning: Vec::new(),
            tools_used: Vec::new(),
            success: false,
            duration_ms: duration.as_millis() as u64,
            error: Some(error.to_string()),
        };
        self.store.finish_step(trace_id, agent, attempt, outcome).await
    }

    pub async fn append_reasoning(
        &self,
        trace_id: Uuid,
        agent: AgentType,
        line: &str,
    ) -> Result<()> {
        self.store
            .append_reasoning(trace_id, agent, line.to_string())
            .await
    }

    pub async fn append_error(&self, trace_id: Uuid, agent: AgentType, error: &str) -> Result<()> {
        self.store
            .append_error(trace_id, agent, error.to_string())
            .await
    }

    pub async fn complete_trace(&self, trace_id: Uuid) -> Result<()> {
        self.store.complete_trace(trace_id).await
    }

    pub async fn get_trace(&self, trace_id: Uuid) -> Result<DecisionTrace> {
        self.store
            .get_trace(trace_id)
            .await?
            .ok_or_else(|| OrchestrationError::TraceNotFound(trace_id.to_string()))
    }

    pub async fn recent_traces(&self, user_id: Uuid, limit: usize) -> Result<Vec<Uuid>> {
        self.store.recent_trace_ids(user_id, limit).await
    }

    pub async fn record_feedback(&self, trace_id: Uuid, feedback: &str) -> Result<()> {
        self.store
            .record_feedback(trace_id, feedback.to_string())
            .await
    }

    pub async fn agent_metrics(&self) -> Result<Vec<AgentPerformance>> {
        self.store.agent_metrics().await
    }

    /// Age-based retention cleanup. Returns how many traces were removed.
    pub async fn delete_older_than(&self, days: u32) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(days as i64);
        let removed = self.store.delete_older_than(cutoff).await?;
        if removed > 0 {
            info!(removed, days, "pruned old decision traces");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn success_response(confidence: f64) -> AgentResponse {
        AgentResponse::success(
            json!({"answer": 42}),
            vec!["looked it up".to_string()],
            vec!["calculate_emi".to_string()],
            confidence,
        )
    }

    #[tokio::test]
    async fn step_lifecycle_is_recorded() {
        let service = DecisionTraceService::in_memory();
        let trace_id = DecisionTraceService::generate_trace_id();

        service.start_trace(trace_id, None, "test query").await.unwrap();
        service
            .start_step(trace_id, AgentType::RiskAssessment, 1, json!({"task": "assess"}))
            .await
            .unwrap();
        service
            .complete_step(
                trace_id,
                AgentType::RiskAssessment,
                1,
                &success_response(0.9),
                Duration::from_millis(25),
            )
            .await
            .unwrap();
        service.complete_trace(trace_id).await.unwrap();

        let trace = service.get_trace(trace_id).await.unwrap();
        assert_eq!(trace.steps.len(), 1);
        assert!(trace.success);
        assert!(trace.completed_at.is_some());

        let step = &trace.steps[0];
        assert_eq!(step.agent, AgentType::RiskAssessment);
        assert_eq!(step.attempt, 1);
        assert_eq!(step.duration_ms, 25);
        assert_eq!(step.input["task"], "assess");
        assert_eq!(step.tools_used, vec!["calculate_emi".to_string()]);
    }

    #[tokio::test]
    async fn failed_step_marks_trace_unsuccessful() {
        let service = DecisionTraceService::in_memory();
        let trace_id = Uuid::new_v4();

        service.start_trace(trace_id, None, "q").await.unwrap();
        service
            .start_step(trace_id, AgentType::Simulation, 1, Value::Null)
            .await
            .unwrap();
        service
            .fail_step(
                trace_id,
                AgentType::Simulation,
                1,
                "monte carlo exploded",
                Duration::from_millis(5),
            )
            .await
            .unwrap();
        service.complete_trace(trace_id).await.unwrap();

        let trace = service.get_trace(trace_id).await.unwrap();
        assert!(!trace.success);
        assert_eq!(trace.steps[0].error.as_deref(), Some("monte carlo exploded"));
    }

    #[tokio::test]
    async fn distinct_attempts_do_not_clobber_each_other() {
        let service = DecisionTraceService::in_memory();
        let trace_id = Uuid::new_v4();
        service.start_trace(trace_id, None, "q").await.unwrap();

        for attempt in 1..=2 {
            service
                .start_step(trace_id, AgentType::FinancialPlanning, attempt, Value::Null)
                .await
                .unwrap();
        }
        service
            .fail_step(
                trace_id,
                AgentType::FinancialPlanning,
                1,
                "transient",
                Duration::from_millis(3),
            )
            .await
            .unwrap();
        service
            .complete_step(
                trace_id,
                AgentType::FinancialPlanning,
                2,
                &success_response(0.8),
                Duration::from_millis(4),
            )
            .await
            .unwrap();

        let trace = service.get_trace(trace_id).await.unwrap();
        assert_eq!(trace.steps.len(), 2);
        let attempts: Vec<u32> = trace.steps.iter().map(|s| s.attempt).collect();
        assert!(attempts.contains(&1) && attempts.contains(&2));

        // The successful retry supersedes the failed first attempt.
        service.complete_trace(trace_id).await.unwrap();
        let trace = service.get_trace(trace_id).await.unwrap();
        assert!(trace.success);
    }

    #[tokio::test]
    async fn live_reasoning_survives_when_response_has_none() {
        let service = DecisionTraceService::in_memory();
        let trace_id = Uuid::new_v4();
        service.start_trace(trace_id, None, "q").await.unwrap();
        service
            .start_step(trace_id, AgentType::FinancialGraph, 1, Value::Null)
            .await
            .unwrap();
        service
            .append_reasoning(trace_id, AgentType::FinancialGraph, "querying relationships")
            .await
            .unwrap();

        let bare = AgentResponse::success(json!({}), vec![], vec![], 0.7);
        service
            .complete_step(
                trace_id,
                AgentType::FinancialGraph,
                1,
                &bare,
                Duration::from_millis(1),
            )
            .await
            .unwrap();

        let trace = service.get_trace(trace_id).await.unwrap();
        assert_eq!(trace.steps[0].reasoning, vec!["querying relationships".to_string()]);
    }

    #[tokio::test]
    async fn missing_trace_is_an_error() {
        let service = DecisionTraceService::in_memory();
        let err = service.get_trace(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::TraceNotFound(_)));

        let err = service
            .record_feedback(Uuid::new_v4(), "good answer")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::TraceNotFound(_)));
    }

    #[tokio::test]
    async fn feedback_is_stored_on_the_trace() {
        let service = DecisionTraceService::in_memory();
        let trace_id = Uuid::new_v4();
        service.start_trace(trace_id, None, "q").await.unwrap();
        service.record_feedback(trace_id, "helpful").await.unwrap();

        let trace = service.get_trace(trace_id).await.unwrap();
        assert_eq!(trace.feedback.as_deref(), Some("helpful"));
    }

    #[tokio::test]
    async fn metrics_aggregate_per_agent_type() {
        let service = DecisionTraceService::in_memory();
        let trace_id = Uuid::new_v4();
        service.start_trace(trace_id, None, "q").await.unwrap();

        service
            .start_step(trace_id, AgentType::RiskAssessment, 1, Value::Null)
            .await
            .unwrap();
        service
            .complete_step(
                trace_id,
                AgentType::RiskAssessment,
                1,
                &success_response(0.8),
                Duration::from_millis(10),
            )
            .await
            .unwrap();
        service
            .start_step(trace_id, AgentType::RiskAssessment, 2, Value::Null)
            .await
            .unwrap();
        service
            .fail_step(
                trace_id,
                AgentType::RiskAssessment,
                2,
                "boom",
                Duration::from_millis(30),
            )
            .await
            .unwrap();

        let metrics = service.agent_metrics().await.unwrap();
        let risk = metrics
            .iter()
            .find(|m| m.agent_type == AgentType::RiskAssessment)
            .unwrap();
        assert_eq!(risk.executions, 2);
        assert_eq!(risk.successes, 1);
        assert_eq!(risk.failures, 1);
        assert_eq!(risk.avg_duration_ms, 20.0);
        assert!((risk.avg_confidence - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn recent_traces_are_newest_first_and_limited() {
        let service = DecisionTraceService::in_memory();
        let user_id = Uuid::new_v4();

        let mut ids = Vec::new();
        for i in 0..4 {
            let trace_id = Uuid::new_v4();
            let mut trace = DecisionTrace::new(trace_id, Some(user_id), format!("query {i}"));
            trace.started_at = Utc::now() + chrono::Duration::milliseconds(i);
            service.store.create_trace(trace).await.unwrap();
            ids.push(trace_id);
        }

        let recent = service.recent_traces(user_id, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0], ids[3]);
        assert_eq!(recent[1], ids[2]);
    }

    #[tokio::test]
    async fn retention_cleanup_removes_old_traces() {
        let service = DecisionTraceService::in_memory();

        let old_id = Uuid::new_v4();
        let mut old_trace = DecisionTrace::new(old_id, None, "ancient");
        old_trace.started_at = Utc::now() - chrono::Duration::days(40);
        service.store.create_trace(old_trace).await.unwrap();

        let fresh_id = Uuid::new_v4();
        service.start_trace(fresh_id, None, "fresh").await.unwrap();

        let removed = service.delete_older_than(30).await.unwrap();
        assert_eq!(removed, 1);
        assert!(service.get_trace(old_id).await.is_err());
        assert!(service.get_trace(fresh_id).await.is_ok());
    }
}
