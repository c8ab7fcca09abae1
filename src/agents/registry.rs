//! Agent registry and message routing
//!
//! Routing is all-or-nothing: every recipient is resolved before any
//! agent runs, and fan-out responses come back in recipient order no
//! matter which agent finishes first.

use super::Agent;
use crate::error::OrchestrationError;
use crate::models::{AgentMessage, AgentResponse, AgentType};
use crate::Result;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub struct AgentRegistry {
    agents: HashMap<AgentType, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// Registers an agent under its declared type. Each type can be
    /// registered once.
    pub fn register(&mut self, agent: Arc<dyn Agent>) -> Result<()> {
        let kind = agent.agent_type();
        if self.agents.contains_key(&kind) {
            return Err(OrchestrationError::AgentAlreadyRegistered(
                kind.as_str().to_string(),
            ));
        }
        debug!(agent = %kind, "agent registered");
        self.agents.insert(kind, agent);
        Ok(())
    }

    pub fn get(&self, kind: AgentType) -> Result<Arc<dyn Agent>> {
        self.agents.get(&kind).cloned().ok_or_else(|| {
            let mut available: Vec<&str> = self.agents.keys().map(|k| k.as_str()).collect();
            available.sort_unstable();
            OrchestrationError::AgentNotFound {
                agent: kind.as_str().to_string(),
                available: available.join(", "),
            }
        })
    }

    pub fn contains(&self, kind: AgentType) -> bool {
        self.agents.contains_key(&kind)
    }

    /// Registered agent types, sorted by name.
    pub fn list(&self) -> Vec<AgentType> {
        let mut kinds: Vec<AgentType> = self.agents.keys().copied().collect();
        kinds.sort_unstable_by_key(|k| k.as_str());
        kinds
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Delivers a message to every recipient concurrently. All
    /// recipients are resolved up front, so an unknown recipient fails
    /// the whole route before any agent runs. Responses are returned in
    /// recipient order.
    pub async fn route_message(&self, message: &AgentMessage) -> Result<Vec<AgentResponse>> {
        let mut recipients = Vec::with_capacity(message.to.len());
        for kind in &message.to {
            recipients.push(self.get(*kind)?);
        }

        if recipients.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            message_id = %message.id,
            recipients = recipients.len(),
            "routing message"
        );

        let responses = join_all(
            recipients
                .iter()
                .map(|agent| agent.execute(message)),
        )
        .await;

        Ok(responses)
    }

    /// Runs agents one after another, enriching the shared context with
    /// each agent's result so later agents can build on earlier output.
    pub async fn execute_sequential(
        &self,
        kinds: &[AgentType],
        message: &AgentMessage,
    ) -> Result<Vec<AgentResponse>> {
        let mut agents = Vec::with_capacity(kinds.len());
        for kind in kinds {
            agents.push((*kind, self.get(*kind)?));
        }

        let mut context = message.payload.context.clone();
        let mut responses = Vec::with_capacity(agents.len());

        for (kind, agent) in agents {
            let step_message = message.derive(vec![kind], &message.payload.task, context.clone());
            let response = agent.execute(&step_message).await;
            context.record_step_outcome(kind, response.result.clone(), response.success);
            responses.push(response);
        }

        Ok(responses)
    }

    /// Runs agents concurrently against the same unmodified message.
    pub async fn execute_parallel(
        &self,
        kinds: &[AgentType],
        message: &AgentMessage,
    ) -> Result<Vec<AgentResponse>> {
        let mut agents = Vec::with_capacity(kinds.len());
        for kind in kinds {
            agents.push(self.get(*kind)?);
        }

        let responses = join_all(agents.iter().map(|agent| agent.execute(message))).await;
        Ok(responses)
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::tests::ScriptedAgent;
    use crate::context::TaskContext;
    use serde_json::json;

    fn request_to(recipients: Vec<AgentType>) -> AgentMessage {
        AgentMessage::request(
            AgentType::Orchestrator,
            recipients,
            "analyze",
            TaskContext::new(),
        )
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = AgentRegistry::new();
        registry
            .register(Arc::new(ScriptedAgent::new(AgentType::Simulation)))
            .unwrap();

        let err = registry
            .register(Arc::new(ScriptedAgent::new(AgentType::Simulation)))
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::AgentAlreadyRegistered(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn missing_agent_error_names_the_registered_ones() {
        let mut registry = AgentRegistry::new();
        registry
            .register(Arc::new(ScriptedAgent::new(AgentType::RiskAssessment)))
            .unwrap();
        registry
            .register(Arc::new(ScriptedAgent::new(AgentType::Simulation)))
            .unwrap();

        let err = registry.get(AgentType::FinancialGraph).unwrap_err();
        let OrchestrationError::AgentNotFound { agent, available } = err else {
            panic!("expected AgentNotFound");
        };
        assert_eq!(agent, "financial_graph");
        assert_eq!(available, "risk_assessment, simulation");
    }

    #[tokio::test]
    async fn routing_is_all_or_nothing() {
        let mut registry = AgentRegistry::new();
        let known = ScriptedAgent::new(AgentType::RiskAssessment);
        let calls = known.calls_handle();
        registry.register(Arc::new(known)).unwrap();

        let message = request_to(vec![AgentType::RiskAssessment, AgentType::Simulation]);
        let err = registry.route_message(&message).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::AgentNotFound { .. }));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_recipient_list_yields_no_responses() {
        let registry = AgentRegistry::new();
        let message = request_to(vec![]);
        let responses = registry.route_message(&message).await.unwrap();
        assert!(responses.is_empty());
    }

    #[tokio::test]
    async fn fanout_responses_come_back_in_recipient_order() {
        let mut registry = AgentRegistry::new();
        registry
            .register(Arc::new(ScriptedAgent::delayed(
                AgentType::FinancialPlanning,
                40,
            )))
            .unwrap();
        registry
            .register(Arc::new(ScriptedAgent::delayed(AgentType::RiskAssessment, 5)))
            .unwrap();
        registry
            .register(Arc::new(ScriptedAgent::new(AgentType::Simulation)))
            .unwrap();

        let message = request_to(vec![
            AgentType::FinancialPlanning,
            AgentType::RiskAssessment,
            AgentType::Simulation,
        ]);
        let responses = registry.route_message(&message).await.unwrap();

        let order: Vec<&str> = responses
            .iter()
            .map(|r| r.result["agent"].as_str().unwrap())
            .collect();
        assert_eq!(
            order,
            vec!["financial_planning", "risk_assessment", "simulation"]
        );
    }

    #[tokio::test]
    async fn sequential_execution_feeds_results_forward() {
        let mut registry = AgentRegistry::new();
        registry
            .register(Arc::new(ScriptedAgent::new(AgentType::FinancialPlanning)))
            .unwrap();
        registry
            .register(Arc::new(ScriptedAgent::new(AgentType::RiskAssessment)))
            .unwrap();

        let message = request_to(vec![]);
        let responses = registry
            .execute_sequential(
                &[AgentType::FinancialPlanning, AgentType::RiskAssessment],
                &message,
            )
            .await
            .unwrap();

        assert_eq!(responses.len(), 2);
        let second_saw: Vec<&str> = responses[1].result["seen_keys"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert!(second_saw.contains(&"financial_planning_result"));
        assert!(second_saw.contains(&"financial_planning_success"));
    }

    #[tokio::test]
    async fn parallel_execution_shares_the_original_context() {
        let mut registry = AgentRegistry::new();
        registry
            .register(Arc::new(ScriptedAgent::new(AgentType::InvestmentAdvisor)))
            .unwrap();
        registry
            .register(Arc::new(ScriptedAgent::delayed(AgentType::FinancialGraph, 20)))
            .unwrap();

        let mut context = TaskContext::new();
        context.insert("amount", json!(500000.0));
        let message = AgentMessage::request(
            AgentType::Orchestrator,
            vec![],
            "analyze",
            context,
        );

        let responses = registry
            .execute_parallel(
                &[AgentType::InvestmentAdvisor, AgentType::FinancialGraph],
                &message,
            )
            .await
            .unwrap();

        for response in &responses {
            let seen: Vec<&str> = response.result["seen_keys"]
                .as_array()
                .unwrap()
                .iter()
                .map(|v| v.as_str().unwrap())
                .collect();
            assert_eq!(seen, vec!["amount"]);
        }
        assert_eq!(responses[0].result["agent"], "investment_advisor");
        assert_eq!(responses[1].result["agent"], "financial_graph");
    }
}
