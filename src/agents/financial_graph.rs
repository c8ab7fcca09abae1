//! Financial graph agent
//!
//! Views the user's finances as a small graph: the user at the center,
//! spending categories and accounts as connected nodes. Answers
//! relationship and pattern queries over that graph.

use super::{handle_error, Agent, AgentServices};
use crate::context::TaskContext;
use crate::error::OrchestrationError;
use crate::models::{AgentMessage, AgentResponse, AgentType};
use crate::Result;
use serde_json::{json, Map, Value};
use uuid::Uuid;

const CONCENTRATION_THRESHOLD_PERCENT: f64 = 30.0;

pub struct FinancialGraphAgent {
    services: AgentServices,
}

impl FinancialGraphAgent {
    pub fn new(services: AgentServices) -> Self {
        Self { services }
    }

    fn expenses_of(ctx: &TaskContext) -> Option<Map<String, Value>> {
        ctx.get("expenses").and_then(Value::as_object).cloned()
    }

    async fn query_relationships(
        &self,
        ctx: &TaskContext,
        trace_id: Option<Uuid>,
    ) -> Result<AgentResponse> {
        let agent = AgentType::FinancialGraph;
        let mut reasoning = Vec::new();

        let Some(expenses) = Self::expenses_of(ctx) else {
            self.services
                .reason(
                    agent,
                    trace_id,
                    &mut reasoning,
                    "no expense data linked, graph is empty",
                )
                .await;
            let result = json!({
                "nodes": ["user"],
                "edges": [],
            });
            return Ok(AgentResponse::success(result, reasoning, Vec::new(), 0.4)
                .with_next_actions(vec![
                    "link accounts or share an expense breakdown to populate the graph"
                        .to_string(),
                ]));
        };

        let mut args = json!({"expenses": expenses});
        if let Some(income) = ctx.get_f64("monthly_income") {
            args["monthly_income"] = json!(income);
        }
        let summary = self
            .services
            .call_tool(agent, trace_id, "spending_summary", &args)
            .await?;

        let breakdown = summary
            .get("breakdown_percent")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut nodes = vec![json!("user")];
        let mut edges = Vec::new();
        for (category, weight) in &breakdown {
            nodes.push(json!(category));
            edges.push(json!({
                "from": "user",
                "to": category,
                "relation": "spends_on",
                "weight_percent": weight,
            }));
        }

        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                format!(
                    "built a spending graph with {} category nodes",
                    breakdown.len()
                ),
            )
            .await;

        if let Some(top) = summary.get("top_category").and_then(Value::as_str) {
            self.services
                .reason(
                    agent,
                    trace_id,
                    &mut reasoning,
                    format!("strongest edge is user -> {}", top),
                )
                .await;
        }

        let result = json!({
            "nodes": nodes,
            "edges": edges,
            "summary": summary,
        });

        Ok(AgentResponse::success(
            result,
            reasoning,
            vec!["spending_summary".to_string()],
            0.85,
        ))
    }

    async fn spending_patterns(
        &self,
        ctx: &TaskContext,
        trace_id: Option<Uuid>,
    ) -> Result<AgentResponse> {
        let agent = AgentType::FinancialGraph;
        let mut reasoning = Vec::new();

        let expenses = Self::expenses_of(ctx).ok_or_else(|| {
            OrchestrationError::AgentExecution(
                "spending_patterns requires an expenses breakdown".to_string(),
            )
        })?;

        let mut args = json!({"expenses": expenses});
        if let Some(income) = ctx.get_f64("monthly_income") {
            args["monthly_income"] = json!(income);
        }
        let summary = self
            .services
            .call_tool(agent, trace_id, "spending_summary", &args)
            .await?;

        let breakdown = summary
            .get("breakdown_percent")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let concentrated: Vec<String> = breakdown
            .iter()
            .filter(|(_, weight)| {
                weight.as_f64().unwrap_or(0.0) > CONCENTRATION_THRESHOLD_PERCENT
            })
            .map(|(category, _)| category.clone())
            .collect();

        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                format!(
                    "{} of {} categories exceed {}% of spend",
                    concentrated.len(),
                    breakdown.len(),
                    CONCENTRATION_THRESHOLD_PERCENT
                ),
            )
            .await;

        let evenly_spread = concentrated.is_empty();
        let result = json!({
            "summary": summary,
            "concentrated_categories": concentrated,
            "concentration_threshold_percent": CONCENTRATION_THRESHOLD_PERCENT,
        });

        let next_actions = if evenly_spread {
            vec!["spending is evenly spread across categories".to_string()]
        } else {
            vec!["review the concentrated categories for savings potential".to_string()]
        };

        Ok(AgentResponse::success(
            result,
            reasoning,
            vec!["spending_summary".to_string()],
            0.85,
        )
        .with_next_actions(next_actions))
    }

    async fn linked_accounts(
        &self,
        ctx: &TaskContext,
        trace_id: Option<Uuid>,
    ) -> Result<AgentResponse> {
        let agent = AgentType::FinancialGraph;
        let mut reasoning = Vec::new();

        let accounts = ctx
            .get("accounts")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| {
                OrchestrationError::AgentExecution(
                    "linked_accounts requires an accounts list".to_string(),
                )
            })?;

        let mut by_institution: Map<String, Value> = Map::new();
        let mut dormant = Vec::new();
        let mut total_balance = 0.0;

        for account in &accounts {
            let institution = account
                .get("institution")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let balance = account.get("balance").and_then(Value::as_f64).unwrap_or(0.0);
            total_balance += balance;

            let entry = by_institution
                .entry(institution)
                .or_insert_with(|| json!({"accounts": 0, "balance": 0.0}));
            entry["accounts"] = json!(entry["accounts"].as_u64().unwrap_or(0) + 1);
            entry["balance"] = json!(entry["balance"].as_f64().unwrap_or(0.0) + balance);

            if balance == 0.0 {
                if let Some(name) = account.get("name").and_then(Value::as_str) {
                    dormant.push(name.to_string());
                }
            }
        }

        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                format!(
                    "{} accounts across {} institutions, {} dormant",
                    accounts.len(),
                    by_institution.len(),
                    dormant.len()
                ),
            )
            .await;

        let result = json!({
            "account_count": accounts.len(),
            "total_balance": total_balance,
            "by_institution": Value::Object(by_institution),
            "dormant_accounts": dormant,
        });

        Ok(AgentResponse::success(result, reasoning, Vec::new(), 0.8))
    }
}

#[async_trait::async_trait]
impl Agent for FinancialGraphAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::FinancialGraph
    }

    fn can_handle(&self, task: &str) -> bool {
        matches!(
            task,
            "query_relationships" | "spending_patterns" | "linked_accounts"
        )
    }

    async fn execute(&self, message: &AgentMessage) -> AgentResponse {
        let task = message.payload.task.as_str();
        let ctx = &message.payload.context;
        let trace_id = ctx.trace_id();

        let outcome = match task {
            "query_relationships" => self.query_relationships(ctx, trace_id).await,
            "spending_patterns" => self.spending_patterns(ctx, trace_id).await,
            "linked_accounts" => self.linked_accounts(ctx, trace_id).await,
            other => Err(OrchestrationError::AgentExecution(format!(
                "unsupported task: {}",
                other
            ))),
        };

        match outcome {
            Ok(response) => response,
            Err(error) => handle_error(self.agent_type(), task, &error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin::create_default_registry;
    use crate::trace::DecisionTraceService;
    use std::sync::Arc;

    fn agent() -> FinancialGraphAgent {
        let services = AgentServices::new(
            Arc::new(create_default_registry().unwrap()),
            Arc::new(DecisionTraceService::in_memory()),
        );
        FinancialGraphAgent::new(services)
    }

    fn message(task: &str, ctx: TaskContext) -> AgentMessage {
        AgentMessage::request(
            AgentType::Orchestrator,
            vec![AgentType::FinancialGraph],
            task,
            ctx,
        )
    }

    #[tokio::test]
    async fn spending_graph_has_one_edge_per_category() {
        let mut ctx = TaskContext::new();
        ctx.insert(
            "expenses",
            json!({"rent": 30000.0, "food": 12000.0, "transport": 8000.0}),
        );

        let response = agent().execute(&message("query_relationships", ctx)).await;
        assert!(response.success);

        let edges = response.result["edges"].as_array().unwrap();
        assert_eq!(edges.len(), 3);
        assert!(edges.iter().all(|e| e["from"] == json!("user")));
        assert_eq!(response.tools_used, vec!["spending_summary".to_string()]);
    }

    #[tokio::test]
    async fn missing_expense_data_degrades_to_an_empty_graph() {
        let response = agent()
            .execute(&message("query_relationships", TaskContext::new()))
            .await;

        assert!(response.success);
        assert!(response.result["edges"].as_array().unwrap().is_empty());
        assert!(response.confidence < 0.5);
        let actions = response.next_actions.as_ref().unwrap();
        assert!(actions[0].contains("link accounts"));
    }

    #[tokio::test]
    async fn concentrated_spending_is_called_out() {
        let mut ctx = TaskContext::new();
        ctx.insert(
            "expenses",
            json!({"rent": 60000.0, "food": 20000.0, "transport": 20000.0}),
        );

        let response = agent().execute(&message("spending_patterns", ctx)).await;
        assert!(response.success);
        assert_eq!(
            response.result["concentrated_categories"],
            json!(["rent"])
        );
    }

    #[tokio::test]
    async fn linked_accounts_groups_by_institution() {
        let mut ctx = TaskContext::new();
        ctx.insert(
            "accounts",
            json!([
                {"name": "salary", "institution": "hdfc", "balance": 120000.0},
                {"name": "joint", "institution": "hdfc", "balance": 50000.0},
                {"name": "old savings", "institution": "sbi", "balance": 0.0},
            ]),
        );

        let response = agent().execute(&message("linked_accounts", ctx)).await;
        assert!(response.success);
        assert_eq!(response.result["by_institution"]["hdfc"]["accounts"], json!(2));
        assert_eq!(response.result["dormant_accounts"], json!(["old savings"]));
    }
}
