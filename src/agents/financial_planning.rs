//! Financial planning agent
//!
//! Turns goal parameters into a concrete savings plan: the monthly
//! contribution required, a growth projection, and a feasibility check
//! against current cash flow when income data is available.

use super::{handle_error, Agent, AgentServices};
use crate::context::TaskContext;
use crate::error::OrchestrationError;
use crate::models::{AgentMessage, AgentResponse, AgentType};
use crate::Result;
use serde_json::{json, Value};
use uuid::Uuid;

const DEFAULT_TARGET_AMOUNT: f64 = 1_000_000.0;
const DEFAULT_TIMELINE_YEARS: f64 = 5.0;
const DEFAULT_ANNUAL_RETURN_PERCENT: f64 = 12.0;

pub struct FinancialPlanningAgent {
    services: AgentServices,
}

impl FinancialPlanningAgent {
    pub fn new(services: AgentServices) -> Self {
        Self { services }
    }

    /// Monthly contribution needed to reach `target` in `years` at the
    /// given return, with contributions at month start.
    fn required_monthly(target: f64, years: f64, annual_return_percent: f64) -> f64 {
        let i = annual_return_percent / 1200.0;
        let n = years * 12.0;
        if n <= 0.0 {
            return target;
        }
        if i == 0.0 {
            return target / n;
        }
        target / ((((1.0 + i).powf(n) - 1.0) / i) * (1.0 + i))
    }

    /// Years to reach `target` at `monthly` per month, rounded up.
    fn years_to_target(target: f64, monthly: f64, annual_return_percent: f64) -> Option<f64> {
        if monthly <= 0.0 || target <= 0.0 {
            return None;
        }
        let i = annual_return_percent / 1200.0;
        let months = if i == 0.0 {
            target / monthly
        } else {
            ((target * i) / (monthly * (1.0 + i)) + 1.0).ln() / (1.0 + i).ln()
        };
        Some((months / 12.0 * 10.0).ceil() / 10.0)
    }

    async fn create_goal_plan(
        &self,
        ctx: &TaskContext,
        trace_id: Option<Uuid>,
    ) -> Result<AgentResponse> {
        let agent = AgentType::FinancialPlanning;
        let mut reasoning = Vec::new();
        let mut tools_used = Vec::new();
        let mut confidence: f64 = 0.75;

        let target = ctx.get_f64("amount").unwrap_or(DEFAULT_TARGET_AMOUNT);
        let years = ctx
            .get_f64("timeline_years")
            .unwrap_or(DEFAULT_TIMELINE_YEARS);
        if ctx.contains_key("amount") {
            confidence += 0.1;
        }
        if ctx.contains_key("timeline_years") {
            confidence += 0.05;
        }
        let goal_type = ctx.get_str("goal_type").unwrap_or("wealth").to_string();
        let annual_return = ctx
            .get_f64("expected_return_percent")
            .unwrap_or(DEFAULT_ANNUAL_RETURN_PERCENT);

        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                format!(
                    "planning a {} goal of {:.0} over {} years at {}% expected return",
                    goal_type, target, years, annual_return
                ),
            )
            .await;

        let monthly = Self::required_monthly(target, years, annual_return);
        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                format!("required monthly contribution is {:.0}", monthly),
            )
            .await;

        let projection = self
            .services
            .call_tool(
                agent,
                trace_id,
                "project_growth",
                &json!({
                    "monthly_investment": monthly,
                    "annual_return_percent": annual_return,
                    "years": years,
                }),
            )
            .await?;
        tools_used.push("project_growth".to_string());

        let mut result = json!({
            "goal_type": goal_type,
            "target_amount": target,
            "timeline_years": years,
            "expected_annual_return_percent": annual_return,
            "required_monthly_investment": (monthly * 100.0).round() / 100.0,
            "projection": projection,
        });

        let mut next_actions = vec![format!(
            "start a monthly investment of {:.0} toward the {} goal",
            monthly, goal_type
        )];

        if let (Some(income), Some(expenses)) = (
            ctx.get_f64("monthly_income"),
            ctx.get_f64("monthly_expenses"),
        ) {
            let snapshot = self
                .services
                .call_tool(
                    agent,
                    trace_id,
                    "savings_rate",
                    &json!({
                        "monthly_income": income,
                        "monthly_expenses": expenses,
                    }),
                )
                .await?;
            tools_used.push("savings_rate".to_string());

            let capacity = snapshot
                .get("monthly_savings")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            let feasible = capacity >= monthly;
            self.services
                .reason(
                    agent,
                    trace_id,
                    &mut reasoning,
                    format!(
                        "current savings capacity is {:.0} per month, the plan is {}",
                        capacity,
                        if feasible { "feasible" } else { "not yet feasible" }
                    ),
                )
                .await;

            result["cash_flow"] = snapshot;
            result["feasible"] = json!(feasible);
            confidence += 0.05;

            if !feasible {
                next_actions.push(format!(
                    "free up {:.0} more per month or extend the timeline",
                    monthly - capacity
                ));
            }
        }

        Ok(AgentResponse::success(result, reasoning, tools_used, confidence)
            .with_next_actions(next_actions))
    }

    async fn analyze_feasibility(
        &self,
        ctx: &TaskContext,
        trace_id: Option<Uuid>,
    ) -> Result<AgentResponse> {
        let agent = AgentType::FinancialPlanning;
        let mut reasoning = Vec::new();

        let income = ctx.get_f64("monthly_income").ok_or_else(|| {
            OrchestrationError::AgentExecution(
                "analyze_feasibility requires monthly_income".to_string(),
            )
        })?;
        let expenses = ctx.get_f64("monthly_expenses").ok_or_else(|| {
            OrchestrationError::AgentExecution(
                "analyze_feasibility requires monthly_expenses".to_string(),
            )
        })?;
        let target = ctx.get_f64("amount").unwrap_or(DEFAULT_TARGET_AMOUNT);
        let years = ctx
            .get_f64("timeline_years")
            .unwrap_or(DEFAULT_TIMELINE_YEARS);

        let snapshot = self
            .services
            .call_tool(
                agent,
                trace_id,
                "savings_rate",
                &json!({"monthly_income": income, "monthly_expenses": expenses}),
            )
            .await?;
        let capacity = snapshot
            .get("monthly_savings")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        let required = Self::required_monthly(target, years, DEFAULT_ANNUAL_RETURN_PERCENT);
        let feasible = capacity >= required;

        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                format!(
                    "goal needs {:.0} per month against a capacity of {:.0}",
                    required, capacity
                ),
            )
            .await;

        let mut result = json!({
            "target_amount": target,
            "timeline_years": years,
            "required_monthly_investment": (required * 100.0).round() / 100.0,
            "savings_capacity": capacity,
            "feasible": feasible,
            "cash_flow": snapshot,
        });

        let mut next_actions = Vec::new();
        if !feasible {
            if let Some(stretched) =
                Self::years_to_target(target, capacity, DEFAULT_ANNUAL_RETURN_PERCENT)
            {
                self.services
                    .reason(
                        agent,
                        trace_id,
                        &mut reasoning,
                        format!("at current capacity the goal takes {} years", stretched),
                    )
                    .await;
                result["years_at_current_capacity"] = json!(stretched);
                next_actions.push(format!(
                    "extend the timeline to {} years or raise monthly savings to {:.0}",
                    stretched, required
                ));
            }
        } else {
            next_actions.push("lock in the plan with an automatic transfer".to_string());
        }

        Ok(
            AgentResponse::success(result, reasoning, vec!["savings_rate".to_string()], 0.85)
                .with_next_actions(next_actions),
        )
    }

    async fn suggest_monthly_savings(
        &self,
        ctx: &TaskContext,
        trace_id: Option<Uuid>,
    ) -> Result<AgentResponse> {
        let agent = AgentType::FinancialPlanning;
        let mut reasoning = Vec::new();

        let income = ctx.get_f64("monthly_income").ok_or_else(|| {
            OrchestrationError::AgentExecution(
                "suggest_monthly_savings requires monthly_income".to_string(),
            )
        })?;
        let expenses = ctx.get_f64("monthly_expenses").unwrap_or(0.0);

        let snapshot = self
            .services
            .call_tool(
                agent,
                trace_id,
                "savings_rate",
                &json!({"monthly_income": income, "monthly_expenses": expenses}),
            )
            .await?;

        let current = snapshot
            .get("monthly_savings")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let benchmark = income * 0.2;
        let suggested = current.max(benchmark);

        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                format!(
                    "saving {:.0} of {:.0} income; 20% benchmark is {:.0}",
                    current, income, benchmark
                ),
            )
            .await;

        let result = json!({
            "current_monthly_savings": current,
            "benchmark_monthly_savings": benchmark,
            "suggested_monthly_savings": suggested,
            "cash_flow": snapshot,
        });

        let next_actions = if current < benchmark {
            vec![format!(
                "raise monthly savings by {:.0} to reach the 20% benchmark",
                benchmark - current
            )]
        } else {
            vec!["savings rate is on track, review quarterly".to_string()]
        };

        Ok(
            AgentResponse::success(result, reasoning, vec!["savings_rate".to_string()], 0.8)
                .with_next_actions(next_actions),
        )
    }
}

#[async_trait::async_trait]
impl Agent for FinancialPlanningAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::FinancialPlanning
    }

    fn can_handle(&self, task: &str) -> bool {
        matches!(
            task,
            "create_goal_plan" | "analyze_feasibility" | "suggest_monthly_savings"
        )
    }

    async fn execute(&self, message: &AgentMessage) -> AgentResponse {
        let task = message.payload.task.as_str();
        let ctx = &message.payload.context;
        let trace_id = ctx.trace_id();

        let outcome = match task {
            "create_goal_plan" => self.create_goal_plan(ctx, trace_id).await,
            "analyze_feasibility" => self.analyze_feasibility(ctx, trace_id).await,
            "suggest_monthly_savings" => self.suggest_monthly_savings(ctx, trace_id).await,
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

    fn agent() -> FinancialPlanningAgent {
        let services = AgentServices::new(
            Arc::new(create_default_registry().unwrap()),
            Arc::new(DecisionTraceService::in_memory()),
        );
        FinancialPlanningAgent::new(services)
    }

    fn message(task: &str, ctx: TaskContext) -> AgentMessage {
        AgentMessage::request(
            AgentType::Orchestrator,
            vec![AgentType::FinancialPlanning],
            task,
            ctx,
        )
    }

    #[test]
    fn required_monthly_handles_zero_rate() {
        assert!((FinancialPlanningAgent::required_monthly(120_000.0, 1.0, 0.0) - 10_000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn goal_plan_projection_hits_the_target() {
        let mut ctx = TaskContext::new();
        ctx.insert("amount", json!(5_000_000.0));
        ctx.insert("timeline_years", json!(10.0));
        ctx.insert("goal_type", json!("education"));

        let response = agent().execute(&message("create_goal_plan", ctx)).await;
        assert!(response.success);

        let monthly = response.result["required_monthly_investment"]
            .as_f64()
            .unwrap();
        assert!(monthly > 21_000.0 && monthly < 22_000.0);

        // Investing exactly the required monthly amount reaches the target.
        let projected = response.result["projection"]["future_value"]
            .as_f64()
            .unwrap();
        assert!((projected - 5_000_000.0).abs() < 1.0);
        assert_eq!(response.tools_used, vec!["project_growth".to_string()]);
    }

    #[tokio::test]
    async fn cash_flow_data_adds_a_feasibility_verdict() {
        let mut ctx = TaskContext::new();
        ctx.insert("amount", json!(5_000_000.0));
        ctx.insert("timeline_years", json!(10.0));
        ctx.insert("monthly_income", json!(100_000.0));
        ctx.insert("monthly_expenses", json!(60_000.0));

        let response = agent().execute(&message("create_goal_plan", ctx)).await;
        assert!(response.success);
        assert_eq!(response.result["feasible"], json!(true));
        assert!(response.tools_used.contains(&"savings_rate".to_string()));
    }

    #[tokio::test]
    async fn unsupported_task_becomes_a_failure_response() {
        let response = agent()
            .execute(&message("forecast_weather", TaskContext::new()))
            .await;

        assert!(!response.success);
        let error = response.error.as_ref().unwrap();
        assert_eq!(error.code, "AGENT_EXECUTION_ERROR");
        assert!(!response.is_recoverable_failure());
        let actions = response.next_actions.as_ref().unwrap();
        assert!(actions[0].contains("escalate"));
    }
}
