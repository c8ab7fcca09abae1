//! Simulation agent
//!
//! Projects outcomes under pessimistic, expected, and optimistic return
//! scenarios, and stress-tests plans against an early market drawdown.

use super::{handle_error, Agent, AgentServices};
use crate::context::TaskContext;
use crate::error::OrchestrationError;
use crate::models::{AgentMessage, AgentResponse, AgentType};
use crate::Result;
use serde_json::{json, Value};
use uuid::Uuid;

const DEFAULT_MONTHLY: f64 = 10_000.0;
const DEFAULT_YEARS: f64 = 10.0;

/// Return scenarios in percent per year.
const SCENARIOS: &[(&str, f64)] = &[
    ("pessimistic", 8.0),
    ("expected", 12.0),
    ("optimistic", 15.0),
];

pub struct SimulationAgent {
    services: AgentServices,
}

impl SimulationAgent {
    pub fn new(services: AgentServices) -> Self {
        Self { services }
    }

    /// Monthly contribution for the projection, favoring what the
    /// planning step already computed over raw context input.
    fn monthly_contribution(ctx: &TaskContext) -> (f64, bool) {
        if let Some(planned) = ctx
            .step_result(AgentType::FinancialPlanning)
            .and_then(|r| r.get("required_monthly_investment"))
            .and_then(Value::as_f64)
        {
            return (planned, true);
        }
        (
            ctx.get_f64("monthly_investment").unwrap_or(DEFAULT_MONTHLY),
            false,
        )
    }

    async fn run_scenarios(
        &self,
        trace_id: Option<Uuid>,
        monthly: f64,
        lump_sum: f64,
        years: f64,
    ) -> Result<Vec<Value>> {
        let agent = AgentType::Simulation;
        let mut outcomes = Vec::with_capacity(SCENARIOS.len());

        for (name, annual_return) in SCENARIOS {
            let mut args = json!({
                "annual_return_percent": annual_return,
                "years": years,
            });
            if monthly > 0.0 {
                args["monthly_investment"] = json!(monthly);
            }
            if lump_sum > 0.0 {
                args["lump_sum"] = json!(lump_sum);
            }

            let projection = self
                .services
                .call_tool(agent, trace_id, "project_growth", &args)
                .await?;
            outcomes.push(json!({
                "scenario": name,
                "annual_return_percent": annual_return,
                "projection": projection,
            }));
        }

        Ok(outcomes)
    }

    async fn run_projection(
        &self,
        ctx: &TaskContext,
        trace_id: Option<Uuid>,
    ) -> Result<AgentResponse> {
        let agent = AgentType::Simulation;
        let mut reasoning = Vec::new();

        let (monthly, from_plan) = Self::monthly_contribution(ctx);
        let lump_sum = ctx.get_f64("lump_sum").unwrap_or(0.0);
        let years = ctx.get_f64("timeline_years").unwrap_or(DEFAULT_YEARS);

        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                format!(
                    "projecting {:.0} per month over {} years across {} scenarios{}",
                    monthly,
                    years,
                    SCENARIOS.len(),
                    if from_plan {
                        " using the planned contribution"
                    } else {
                        ""
                    }
                ),
            )
            .await;

        let outcomes = self
            .run_scenarios(trace_id, monthly, lump_sum, years)
            .await?;

        let spread = {
            let low = outcomes[0]["projection"]["future_value"]
                .as_f64()
                .unwrap_or(0.0);
            let high = outcomes[SCENARIOS.len() - 1]["projection"]["future_value"]
                .as_f64()
                .unwrap_or(0.0);
            high - low
        };
        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                format!("outcome spread between scenarios is {:.0}", spread),
            )
            .await;

        let result = json!({
            "monthly_investment": monthly,
            "lump_sum": lump_sum,
            "timeline_years": years,
            "scenarios": outcomes,
            "outcome_spread": (spread * 100.0).round() / 100.0,
        });

        Ok(AgentResponse::success(
            result,
            reasoning,
            vec!["project_growth".to_string()],
            0.85,
        )
        .with_next_actions(vec![
            "revisit the projection yearly as returns realize".to_string()
        ]))
    }

    async fn project_goal(
        &self,
        ctx: &TaskContext,
        trace_id: Option<Uuid>,
    ) -> Result<AgentResponse> {
        let agent = AgentType::Simulation;
        let mut reasoning = Vec::new();

        let target = ctx.get_f64("amount").ok_or_else(|| {
            OrchestrationError::AgentExecution("project_goal requires a target amount".to_string())
        })?;
        let (monthly, _) = Self::monthly_contribution(ctx);
        let lump_sum = ctx.get_f64("lump_sum").unwrap_or(0.0);
        let years = ctx.get_f64("timeline_years").unwrap_or(DEFAULT_YEARS);

        let outcomes = self
            .run_scenarios(trace_id, monthly, lump_sum, years)
            .await?;

        let mut met_in = Vec::new();
        for outcome in &outcomes {
            let value = outcome["projection"]["future_value"].as_f64().unwrap_or(0.0);
            if value >= target {
                met_in.push(outcome["scenario"].as_str().unwrap_or("").to_string());
            }
        }

        let verdict = if met_in.len() == SCENARIOS.len() {
            "comfortably on track"
        } else if met_in.iter().any(|s| s == "expected") {
            "on track in the expected case"
        } else if !met_in.is_empty() {
            "only reached in the optimistic case"
        } else {
            "off track in every scenario"
        };

        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                format!("target {:.0} is {}", target, verdict),
            )
            .await;

        let result = json!({
            "target_amount": target,
            "monthly_investment": monthly,
            "timeline_years": years,
            "scenarios": outcomes,
            "scenarios_meeting_target": met_in,
            "verdict": verdict,
        });

        let next_actions = if met_in.len() < SCENARIOS.len() {
            vec!["increase the contribution or extend the timeline for more headroom".to_string()]
        } else {
            vec!["plan holds under all scenarios, no change needed".to_string()]
        };

        Ok(AgentResponse::success(
            result,
            reasoning,
            vec!["project_growth".to_string()],
            0.85,
        )
        .with_next_actions(next_actions))
    }

    async fn stress_test(
        &self,
        ctx: &TaskContext,
        trace_id: Option<Uuid>,
    ) -> Result<AgentResponse> {
        let agent = AgentType::Simulation;
        let mut reasoning = Vec::new();

        let (monthly, _) = Self::monthly_contribution(ctx);
        let lump_sum = ctx.get_f64("lump_sum").unwrap_or(0.0);
        let years = ctx.get_f64("timeline_years").unwrap_or(DEFAULT_YEARS);
        let crash_percent = ctx.get_f64("crash_percent").unwrap_or(30.0);

        if years <= 1.0 {
            return Err(OrchestrationError::AgentExecution(
                "stress_test needs a horizon beyond one year".to_string(),
            ));
        }

        // Baseline path.
        let mut base_args = json!({"annual_return_percent": 12.0, "years": years});
        if monthly > 0.0 {
            base_args["monthly_investment"] = json!(monthly);
        }
        if lump_sum > 0.0 {
            base_args["lump_sum"] = json!(lump_sum);
        }
        let baseline = self
            .services
            .call_tool(agent, trace_id, "project_growth", &base_args)
            .await?;

        // Crash path: year one ends down `crash_percent`, then the
        // remaining years compound normally on the damaged base.
        let year_one = self
            .services
            .call_tool(
                agent,
                trace_id,
                "project_growth",
                &json!({
                    "monthly_investment": monthly,
                    "lump_sum": lump_sum,
                    "annual_return_percent": 0.0,
                    "years": 1.0,
                }),
            )
            .await?;
        let damaged = year_one
            .get("future_value")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            * (1.0 - crash_percent / 100.0);

        let mut recovery_args = json!({
            "lump_sum": damaged,
            "annual_return_percent": 12.0,
            "years": years - 1.0,
        });
        if monthly > 0.0 {
            recovery_args["monthly_investment"] = json!(monthly);
        }
        let stressed = self
            .services
            .call_tool(agent, trace_id, "project_growth", &recovery_args)
            .await?;

        let base_value = baseline.get("future_value").and_then(Value::as_f64).unwrap_or(0.0);
        let stressed_value = stressed.get("future_value").and_then(Value::as_f64).unwrap_or(0.0);
        let drawdown_cost = base_value - stressed_value;

        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                format!(
                    "a {:.0}% first-year crash costs {:.0} by year {}",
                    crash_percent, drawdown_cost, years
                ),
            )
            .await;

        let result = json!({
            "crash_percent": crash_percent,
            "baseline": baseline,
            "stressed": stressed,
            "terminal_shortfall": (drawdown_cost * 100.0).round() / 100.0,
        });

        Ok(AgentResponse::success(
            result,
            reasoning,
            vec!["project_growth".to_string()],
            0.8,
        )
        .with_next_actions(vec![
            "keep an emergency buffer so a crash never forces selling".to_string(),
        ]))
    }
}

#[async_trait::async_trait]
impl Agent for SimulationAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Simulation
    }

    fn can_handle(&self, task: &str) -> bool {
        matches!(task, "run_projection" | "project_goal" | "stress_test")
    }

    async fn execute(&self, message: &AgentMessage) -> AgentResponse {
        let task = message.payload.task.as_str();
        let ctx = &message.payload.context;
        let trace_id = ctx.trace_id();

        let outcome = match task {
            "run_projection" => self.run_projection(ctx, trace_id).await,
            "project_goal" => self.project_goal(ctx, trace_id).await,
            "stress_test" => self.stress_test(ctx, trace_id).await,
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
