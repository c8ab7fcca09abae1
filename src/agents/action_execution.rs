//! Action execution agent
//!
//! Turns upstream recommendations into drafted, confirmable action
//! items. Nothing is executed here; every item is a draft that needs an
//! explicit user confirmation downstream.

use super::{handle_error, Agent, AgentServices};
use crate::context::TaskContext;
use crate::error::OrchestrationError;
use crate::models::{AgentMessage, AgentResponse, AgentType};
use crate::Result;
use chrono::{Datelike, Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

pub struct ActionExecutionAgent {
    services: AgentServices,
}

fn draft(kind: &str, description: String, params: Value) -> Value {
    json!({
        "action_id": Uuid::new_v4().to_string(),
        "kind": kind,
        "description": description,
        "params": params,
        "requires_confirmation": true,
        "status": "draft",
    })
}

/// First day of the month after `from`.
fn next_month_start(from: chrono::DateTime<Utc>) -> String {
    let (year, month) = if from.month() == 12 {
        (from.year() + 1, 1)
    } else {
        (from.year(), from.month() + 1)
    };
    format!("{:04}-{:02}-01", year, month)
}

impl ActionExecutionAgent {
    pub fn new(services: AgentServices) -> Self {
        Self { services }
    }

    async fn prepare_actions(
        &self,
        ctx: &TaskContext,
        trace_id: Option<Uuid>,
    ) -> Result<AgentResponse> {
        let agent = AgentType::ActionExecution;
        let mut reasoning = Vec::new();
        let mut actions = Vec::new();

        if let Some(monthly) = ctx
            .step_result(AgentType::FinancialPlanning)
            .and_then(|r| r.get("required_monthly_investment"))
            .and_then(Value::as_f64)
        {
            let start = next_month_start(Utc::now());
            actions.push(draft(
                "recurring_transfer",
                format!("schedule a monthly transfer of {:.0} into the goal portfolio", monthly),
                json!({"amount": monthly, "frequency": "monthly", "start_date": start}),
            ));
            self.services
                .reason(
                    agent,
                    trace_id,
                    &mut reasoning,
                    "drafted the recurring transfer from the goal plan",
                )
                .await;
        }

        if let Some(allocation) = ctx
            .step_result(AgentType::InvestmentAdvisor)
            .and_then(|r| r.get("allocation"))
        {
            actions.push(draft(
                "rebalance",
                "rebalance holdings to the recommended allocation".to_string(),
                json!({"target_allocation": allocation}),
            ));
            self.services
                .reason(
                    agent,
                    trace_id,
                    &mut reasoning,
                    "drafted a rebalance to the advisor's allocation",
                )
                .await;
        }

        if let Some(alerts) = ctx
            .step_result(AgentType::MonitoringAlerting)
            .and_then(|r| r.get("alerts"))
            .and_then(Value::as_array)
        {
            actions.push(draft(
                "enable_alerts",
                format!("enable {} configured alerts", alerts.len()),
                json!({"alerts": alerts}),
            ));
        }

        if actions.is_empty() {
            self.services
                .reason(
                    agent,
                    trace_id,
                    &mut reasoning,
                    "no upstream recommendations to act on, drafting a review task",
                )
                .await;
            actions.push(draft(
                "schedule_review",
                "schedule a financial review session".to_string(),
                json!({"due": next_month_start(Utc::now())}),
            ));
        }

        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                format!("{} actions drafted, all awaiting confirmation", actions.len()),
            )
            .await;

        let result = json!({
            "actions": actions,
            "executed": 0,
        });

        Ok(AgentResponse::success(result, reasoning, Vec::new(), 0.8)
            .with_next_actions(vec![
                "confirm the drafted actions to schedule them".to_string()
            ]))
    }

    async fn draft_transfers(
        &self,
        ctx: &TaskContext,
        trace_id: Option<Uuid>,
    ) -> Result<AgentResponse> {
        let agent = AgentType::ActionExecution;
        let mut reasoning = Vec::new();

        let amount = ctx.get_f64("amount").ok_or_else(|| {
            OrchestrationError::AgentExecution(
                "draft_transfers requires a transfer amount".to_string(),
            )
        })?;
        if amount <= 0.0 {
            return Err(OrchestrationError::AgentExecution(
                "transfer amount must be positive".to_string(),
            ));
        }
        let frequency = ctx.get_str("frequency").unwrap_or("monthly").to_string();
        let start = next_month_start(Utc::now());

        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                format!("drafting a {} transfer of {:.0} starting {}", frequency, amount, start),
            )
            .await;

        let transfer = draft(
            "transfer",
            format!("{} transfer of {:.0}", frequency, amount),
            json!({"amount": amount, "frequency": frequency, "start_date": start}),
        );

        Ok(AgentResponse::success(
            json!({"actions": [transfer]}),
            reasoning,
            Vec::new(),
            0.85,
        )
        .with_next_actions(vec!["confirm the transfer draft".to_string()]))
    }

    async fn schedule_reminders(
        &self,
        ctx: &TaskContext,
        trace_id: Option<Uuid>,
    ) -> Result<AgentResponse> {
        let agent = AgentType::ActionExecution;
        let mut reasoning = Vec::new();

        let years = ctx.get_f64("timeline_years").unwrap_or(1.0);
        let quarters = ((years * 4.0).round() as i64).clamp(1, 8);

        let now = Utc::now();
        let reminders: Vec<Value> = (1..=quarters)
            .map(|q| {
                let due = now + Duration::days(q * 91);
                json!({
                    "label": format!("quarterly review {}", q),
                    "due_date": due.format("%Y-%m-%d").to_string(),
                })
            })
            .collect();

        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                format!("scheduled {} quarterly review reminders", reminders.len()),
            )
            .await;

        Ok(AgentResponse::success(
            json!({"reminders": reminders}),
            reasoning,
            Vec::new(),
            0.8,
        ))
    }
}

#[async_trait::async_trait]
impl Agent for ActionExecutionAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::ActionExecution
    }

    fn can_handle(&self, task: &str) -> bool {
        matches!(
            task,
            "prepare_actions" | "draft_transfers" | "schedule_reminders"
        )
    }

    async fn execute(&self, message: &AgentMessage) -> AgentResponse {
        let task = message.payload.task.as_str();
        let ctx = &message.payload.context;
        let trace_id = ctx.trace_id();

        let outcome = match task {
            "prepare_actions" => self.prepare_actions(ctx, trace_id).await,
            "draft_transfers" => self.draft_transfers(ctx, trace_id).await,
            "schedule_reminders" => self.schedule_reminders(ctx, trace_id).await,
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

    fn agent() -> ActionExecutionAgent {
        let services = AgentServices::new(
            Arc::new(create_default_registry().unwrap()),
            Arc::new(DecisionTraceService::in_memory()),
        );
        ActionExecutionAgent::new(services)
    }

    fn message(task: &str, ctx: TaskContext) -> AgentMessage {
        AgentMessage::request(
            AgentType::Orchestrator,
            vec![AgentType::ActionExecution],
            task,
            ctx,
        )
    }

    #[tokio::test]
    async fn upstream_results_become_drafted_actions() {
        let mut ctx = TaskContext::new();
        ctx.record_step_outcome(
            AgentType::FinancialPlanning,
            json!({"required_monthly_investment": 21_500.0}),
            true,
        );
        ctx.record_step_outcome(
            AgentType::InvestmentAdvisor,
            json!({"allocation": {"equity_percent": 55.0}}),
            true,
        );

        let response = agent().execute(&message("prepare_actions", ctx)).await;
        assert!(response.success);

        let actions = response.result["actions"].as_array().unwrap();
        assert_eq!(actions.len(), 2);
        let kinds: Vec<&str> = actions
            .iter()
            .map(|a| a["kind"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["recurring_transfer", "rebalance"]);
        assert!(actions.iter().all(|a| a["status"] == json!("draft")));
        assert!(actions
            .iter()
            .all(|a| a["requires_confirmation"] == json!(true)));
        assert_eq!(response.result["executed"], json!(0));
    }

    #[tokio::test]
    async fn empty_context_still_produces_a_review_draft() {
        let response = agent()
            .execute(&message("prepare_actions", TaskContext::new()))
            .await;
        assert!(response.success);

        let actions = response.result["actions"].as_array().unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0]["kind"], json!("schedule_review"));
    }

    #[tokio::test]
    async fn reminders_are_capped_at_eight() {
        let mut ctx = TaskContext::new();
        ctx.insert("timeline_years", json!(10.0));

        let response = agent().execute(&message("schedule_reminders", ctx)).await;
        assert!(response.success);
        assert_eq!(response.result["reminders"].as_array().unwrap().len(), 8);
    }

    #[test]
    fn next_month_start_rolls_the_year() {
        let december = chrono::DateTime::parse_from_rfc3339("2025-12-15T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(next_month_start(december), "2026-01-01");
    }
}
