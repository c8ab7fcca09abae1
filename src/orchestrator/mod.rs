//! Top-level orchestration state machine
//!
//! RETRIEVE_CONTEXT → ENRICH_MEMORY → CLASSIFY_INTENT → BUILD_PLAN →
//! EXECUTE_PLAN → SYNTHESIZE

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agents::{handle_error, Agent, AgentRegistry};
use crate::classifier::IntentClassifier;
use crate::context::TaskContext;
use crate::error::Result;
use crate::llm::TextGenerator;
use crate::memory::MemoryService;
use crate::models::{
    AgentMessage, AgentResponse, AgentType, ExecutionPlan, ExecutionStep, OrchestrationOutcome,
    UserContext,
};
use crate::planner::ExecutionPlanBuilder;
use crate::retrieval::{ContextRetriever, RetrievalOptions};
use crate::trace::DecisionTraceService;

const MAX_RELEVANT_CONVERSATIONS: usize = 3;
const TOP_REASONING_LINES: usize = 3;
const SYNTHESIS_MAX_TOKENS: u32 = 512;
const SYNTHESIS_TEMPERATURE: f32 = 0.4;

/// One executed plan step and the response it produced.
struct StepRun {
    agent: AgentType,
    response: AgentResponse,
}

/// Coordinates the specialized agents for one user query: classifies the
/// query, expands it into an execution plan, runs the plan with per-step
/// timeout and retry, and synthesizes the step outputs into one answer.
/// Every step lands in the decision trace.
///
/// The retriever and generator collaborators are optional; without them the
/// engine skips semantic retrieval and falls back to the templated summary.
pub struct OrchestratorAgent {
    registry: Arc<AgentRegistry>,
    plan_builder: ExecutionPlanBuilder,
    trace: Arc<DecisionTraceService>,
    memory: Arc<MemoryService>,
    retriever: Option<Arc<dyn ContextRetriever>>,
    generator: Option<Arc<dyn TextGenerator>>,
}

impl OrchestratorAgent {
    pub fn new(
        registry: Arc<AgentRegistry>,
        trace: Arc<DecisionTraceService>,
        memory: Arc<MemoryService>,
    ) -> Self {
        Self {
            registry,
            plan_builder: ExecutionPlanBuilder::new(),
            trace,
            memory,
            retriever: None,
            generator: None,
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn ContextRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn generate_trace_id() -> Uuid {
        DecisionTraceService::generate_trace_id()
    }

    /// Run the full state machine for one query.
    pub async fn orchestrate(
        &self,
        query: &str,
        user: &UserContext,
    ) -> Result<OrchestrationOutcome> {
        let started = Instant::now();
        let trace_id = Self::generate_trace_id();

        info!(
            %trace_id,
            user_id = ?user.user_id,
            query = %query,
            "orchestration started"
        );

        if let Err(error) = self.trace.start_trace(trace_id, user.user_id, query).await {
            warn!(%trace_id, %error, "could not open the decision trace");
        }

        let mut context = user.attributes.clone();
        context.insert("original_query", json!(query));
        context.insert("trace_id", json!(trace_id.to_string()));

        // === RETRIEVE_CONTEXT ===
        self.retrieve_context(query, user, &mut context).await;

        // === ENRICH_MEMORY ===
        self.enrich_from_memory(query, user, &mut context).await;

        // === CLASSIFY_INTENT ===
        let classification = IntentClassifier::classify(query);
        let intent = classification.intent;
        classification.entities.apply_to(&mut context);
        context.insert("intent", json!(intent.as_str()));
        info!(%trace_id, intent = %intent, "query classified");

        // === BUILD_PLAN ===
        let plan = self.plan_builder.build_plan(intent.as_str(), context, None)?;
        debug!(
            %trace_id,
            steps = plan.metadata.total_steps,
            mode = ?plan.metadata.execution_mode,
            "execution plan ready"
        );

        // === EXECUTE_PLAN ===
        let runs = self.execute_plan(trace_id, plan).await;

        // === SYNTHESIZE ===
        let (result, confidence) = self.synthesize(query, intent.as_str(), &runs).await;

        if let Err(error) = self.trace.complete_trace(trace_id).await {
            warn!(%trace_id, %error, "could not close the decision trace");
        }

        if let Some(user_id) = user.user_id {
            let summary = result.get("summary").and_then(Value::as_str).unwrap_or("");
            if let Err(error) = self
                .memory
                .record_exchange(user_id, query, summary, intent.as_str())
                .await
            {
                warn!(%trace_id, %error, "could not record the exchange");
            }
        }

        info!(
            %trace_id,
            confidence,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "orchestration complete"
        );

        Ok(OrchestrationOutcome {
            trace_id,
            result,
            confidence,
        })
    }

    /// Semantic retrieval is skipped for anonymous requests and degrades to
    /// nothing when the collaborator is missing or failing.
    async fn retrieve_context(&self, query: &str, user: &UserContext, context: &mut TaskContext) {
        let Some(retriever) = &self.retriever else {
            debug!("no retriever configured; skipping context retrieval");
            return;
        };
        if user.user_id.is_none() {
            debug!("anonymous request; skipping context retrieval");
            return;
        }

        match retriever
            .retrieve_context(query, user.user_id, &RetrievalOptions::default())
            .await
        {
            Ok(documents) if documents.is_empty() => {
                debug!("context retrieval returned nothing");
            }
            Ok(documents) => {
                debug!(documents = documents.len(), "retrieved semantic context");
                let entries: Vec<Value> = documents
                    .iter()
                    .map(|d| json!({"text": d.text, "score": d.score}))
                    .collect();
                context.insert("retrieved_context", Value::Array(entries));
            }
            Err(error) => {
                warn!(%error, "context retrieval failed; continuing without it");
            }
        }
    }

    async fn enrich_from_memory(&self, query: &str, user: &UserContext, context: &mut TaskContext) {
        let Some(user_id) = user.user_id else {
            return;
        };

        match self.memory.get_user_preferences(user_id).await {
            Ok(preferences) => {
                // Caller-supplied attributes win over remembered preferences.
                if !context.contains_key("risk_tolerance") {
                    context.insert("risk_tolerance", json!(preferences.risk_tolerance));
                }
                if !context.contains_key("investment_style") {
                    context.insert("investment_style", json!(preferences.investment_style));
                }
                if let Ok(value) = serde_json::to_value(&preferences) {
                    context.insert("user_preferences", value);
                }
            }
            Err(error) => warn!(%error, "preference lookup failed; using the bare context"),
        }

        match self
            .memory
            .get_relevant_conversations(user_id, query, MAX_RELEVANT_CONVERSATIONS)
            .await
        {
            Ok(conversations) if !conversations.is_empty() => {
                debug!(
                    conversations = conversations.len(),
                    "recalled past exchanges"
                );
                let entries: Vec<Value> = conversations
                    .iter()
                    .map(|c| json!({"query": c.query, "response": c.response, "intent": c.intent}))
                    .collect();
                context.insert("recent_conversations", Value::Array(entries));
            }
            Ok(_) => {}
            Err(error) => warn!(%error, "conversation recall failed; continuing"),
        }
    }

    /// Runs the plan strictly in step order, merging each step's outcome into
    /// the shared context before the next step starts. A step failure is
    /// recorded and the remaining steps still run on whatever context exists.
    async fn execute_plan(&self, trace_id: Uuid, plan: ExecutionPlan) -> Vec<StepRun> {
        let ExecutionPlan {
            steps, mut context, ..
        } = plan;
        let mut runs = Vec::with_capacity(steps.len());

        for step in &steps {
            let message = AgentMessage::request(
                AgentType::Orchestrator,
                vec![step.agent_type],
                step.task.clone(),
                context.clone(),
            );
            let response = self.run_step(trace_id, step, &message).await;
            context.record_step_outcome(step.agent_type, response.result.clone(), response.success);
            runs.push(StepRun {
                agent: step.agent_type,
                response,
            });
        }

        runs
    }

    /// One step with timeout and plan-level retry. Only failures flagged
    /// recoverable are re-invoked; each attempt gets its own trace row.
    async fn run_step(
        &self,
        trace_id: Uuid,
        step: &ExecutionStep,
        message: &AgentMessage,
    ) -> AgentResponse {
        let agent = match self.registry.get(step.agent_type) {
            Ok(agent) => agent,
            Err(error) => {
                warn!(%trace_id, step = %step.step_id, %error, "step has no agent to run on");
                if let Err(trace_error) = self
                    .trace
                    .fail_step(
                        trace_id,
                        step.agent_type,
                        1,
                        &error.to_string(),
                        Duration::ZERO,
                    )
                    .await
                {
                    warn!(%trace_id, %trace_error, "could not record the failed step");
                }
                return handle_error(step.agent_type, &step.task, &error);
            }
        };

        let input = serde_json::to_value(&message.payload).unwrap_or(Value::Null);
        let max_attempts = if step.retry_on_failure {
            step.max_retries + 1
        } else {
            1
        };
        let mut attempt: u32 = 1;

        loop {
            if let Err(error) = self
                .trace
                .start_step(trace_id, step.agent_type, attempt, input.clone())
                .await
            {
                warn!(%trace_id, %error, "could not record the step start");
            }

            let clock = Instant::now();
            let response = match tokio::time::timeout(step.timeout(), agent.execute(message)).await
            {
                Ok(response) => response,
                Err(_) => {
                    warn!(
                        %trace_id,
                        step = %step.step_id,
                        agent = %step.agent_type,
                        timeout_ms = step.timeout_ms,
                        "step timed out"
                    );
                    timeout_response(step)
                }
            };
            let elapsed = clock.elapsed();

            if let Err(error) = self
                .trace
                .complete_step(trace_id, step.agent_type, attempt, &response, elapsed)
                .await
            {
                warn!(%trace_id, %error, "could not record the step result");
            }

            if response.success {
                return response;
            }
            if attempt >= max_attempts || !response.is_recoverable_failure() {
                warn!(
                    %trace_id,
                    step = %step.step_id,
                    agent = %step.agent_type,
                    attempts = attempt,
                    "step failed; continuing with the remaining plan"
                );
                return response;
            }

            debug!(
                %trace_id,
                step = %step.step_id,
                agent = %step.agent_type,
                attempt,
                "recoverable step failure; retrying"
            );
            attempt += 1;
        }
    }

    /// Folds the step responses into one result. Overall confidence is the
    /// arithmetic mean over every step, failed ones included.
    async fn synthesize(&self, query: &str, intent: &str, runs: &[StepRun]) -> (Value, f64) {
        let confidence = if runs.is_empty() {
            0.0
        } else {
            runs.iter().map(|r| r.response.confidence).sum::<f64>() / runs.len() as f64
        };

        let successful: Vec<&StepRun> = runs.iter().filter(|r| r.response.success).collect();

        let mut next_actions: Vec<String> = Vec::new();
        for run in &successful {
            for action in run.response.next_actions.iter().flatten() {
                if !next_actions.contains(action) {
                    next_actions.push(action.clone());
                }
            }
        }

        let summary = match self.narrative(query, &successful).await {
            Some(narrative) => narrative,
            None => templated_summary(&successful),
        };

        let agents: Vec<Value> = runs
            .iter()
            .map(|r| {
                json!({
                    "agent": r.agent.as_str(),
                    "success": r.response.success,
                    "confidence": r.response.confidence,
                })
            })
            .collect();

        let result = json!({
            "summary": summary,
            "intent": intent,
            "agents": agents,
            "next_actions": next_actions,
        });

        (result, confidence)
    }

    /// Narrative via the text generator, fed the top reasoning lines and
    /// suggested actions of each successful step. Any failure here falls
    /// back to the templated summary.
    async fn narrative(&self, query: &str, successful: &[&StepRun]) -> Option<String> {
        let generator = self.generator.as_ref()?;
        if successful.is_empty() {
            return None;
        }

        let mut prompt = format!("User asked: {}\n\nFindings from the advisory agents:\n", query);
        for run in successful {
            prompt.push_str(&format!("\n{}:\n", run.agent));
            for line in run.response.reasoning.iter().take(TOP_REASONING_LINES) {
                prompt.push_str(&format!("- {}\n", line));
            }
            for action in run.response.next_actions.iter().flatten() {
                prompt.push_str(&format!("- suggested: {}\n", action));
            }
        }
        prompt.push_str("\nWrite one cohesive answer for the user. Keep every number exactly as given.");

        match generator
            .generate(&prompt, SYNTHESIS_MAX_TOKENS, SYNTHESIS_TEMPERATURE)
            .await
        {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(error) => {
                warn!(%error, "narrative generation failed; using the templated summary");
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl Agent for OrchestratorAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Orchestrator
    }

    fn can_handle(&self, _task: &str) -> bool {
        true
    }

    /// Lets the orchestrator answer through the same contract as every
    /// specialized agent: the message task is taken as the user query and
    /// the message context as the caller attributes.
    async fn execute(&self, message: &AgentMessage) -> AgentResponse {
        let mut user = UserContext::anonymous();
        user.attributes = message.payload.context.clone();
        if let Some(id) = message
            .payload
            .context
            .get_str("user_id")
            .and_then(|s| Uuid::parse_str(s).ok())
        {
            user.user_id = Some(id);
        }

        match self.orchestrate(&message.payload.task, &user).await {
            Ok(outcome) => AgentResponse::success(
                outcome.result,
                vec![format!("orchestrated decision trace {}", outcome.trace_id)],
                Vec::new(),
                outcome.confidence,
            ),
            Err(error) => handle_error(AgentType::Orchestrator, &message.payload.task, &error),
        }
    }
}

fn timeout_response(step: &ExecutionStep) -> AgentResponse {
    AgentResponse::failure(
        "AGENT_TIMEOUT",
        format!(
            "{} did not answer within {}ms",
            step.agent_type, step.timeout_ms
        ),
        json!({
            "agent": step.agent_type.as_str(),
            "task": step.task,
            "recoverable": true,
        }),
    )
    .with_next_actions(vec![
        format!("retry {} with a longer timeout", step.agent_type),
        "reduce the request scope and try again".to_string(),
    ])
}

fn templated_summary(successful: &[&StepRun]) -> String {
    if successful.is_empty() {
        return "No agent completed its analysis; please retry or rephrase the request."
            .to_string();
    }

    successful
        .iter()
        .map(|run| {
            let line = run
                .response
                .reasoning
                .first()
                .cloned()
                .unwrap_or_else(|| "analysis completed".to_string());
            format!("{}: {}", run.agent, line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ================= TESTS =================
