//! Risk assessment agent
//!
//! Scores risk capacity from the user's profile and checks whether
//! planned loans fit inside safe debt-service limits.

use super::{handle_error, Agent, AgentServices};
use crate::context::TaskContext;
use crate::error::OrchestrationError;
use crate::models::{AgentMessage, AgentResponse, AgentType};
use crate::Result;
use serde_json::{json, Value};
use uuid::Uuid;

const DEFAULT_AGE: i64 = 35;

/// Typical lending terms per loan type: (annual rate %, tenure years).
fn loan_terms(loan_type: &str) -> (f64, f64) {
    match loan_type {
        "home" => (8.5, 20.0),
        "car" => (9.5, 7.0),
        "education" => (10.0, 10.0),
        _ => (11.0, 5.0),
    }
}

pub struct RiskAssessmentAgent {
    services: AgentServices,
}

impl RiskAssessmentAgent {
    pub fn new(services: AgentServices) -> Self {
        Self { services }
    }

    fn score_args(ctx: &TaskContext) -> Value {
        let mut args = json!({
            "age": ctx.get_u64("age").map(|a| a as i64).unwrap_or(DEFAULT_AGE),
        });
        if let Some(horizon) = ctx.get_f64("timeline_years") {
            args["investment_horizon_years"] = json!(horizon);
        }
        if let Some(dependents) = ctx.get_u64("dependents") {
            args["dependents"] = json!(dependents);
        }
        if let Some(income) = ctx.get_f64("monthly_income") {
            args["monthly_income"] = json!(income);
        }
        if let Some(savings) = ctx.get_f64("existing_savings") {
            args["existing_savings"] = json!(savings);
        }
        args
    }

    async fn assess_overall_risk(
        &self,
        ctx: &TaskContext,
        trace_id: Option<Uuid>,
    ) -> Result<AgentResponse> {
        let agent = AgentType::RiskAssessment;
        let mut reasoning = Vec::new();

        let args = Self::score_args(ctx);
        let profiled = ctx.contains_key("age");
        if !profiled {
            self.services
                .reason(
                    agent,
                    trace_id,
                    &mut reasoning,
                    format!("no age on file, assuming {}", DEFAULT_AGE),
                )
                .await;
        }

        let scored = self
            .services
            .call_tool(agent, trace_id, "risk_score", &args)
            .await?;
        let score = scored.get("risk_score").and_then(Value::as_i64).unwrap_or(50);
        let bucket = scored
            .get("risk_bucket")
            .and_then(Value::as_str)
            .unwrap_or("moderate")
            .to_string();

        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                format!("risk capacity scored {} of 100, bucket {}", score, bucket),
            )
            .await;

        let guidance = match bucket.as_str() {
            "conservative" => "favor debt instruments and capital preservation",
            "aggressive" => "a high equity allocation fits this profile",
            _ => "a balanced equity and debt mix fits this profile",
        };

        let result = json!({
            "risk_score": score,
            "risk_bucket": bucket,
            "factors": scored.get("factors").cloned().unwrap_or(Value::Null),
            "guidance": guidance,
        });

        let confidence = if profiled { 0.9 } else { 0.7 };
        Ok(
            AgentResponse::success(result, reasoning, vec!["risk_score".to_string()], confidence)
                .with_next_actions(vec![
                    "share age, dependents, and savings for a sharper risk profile".to_string(),
                ]),
        )
    }

    async fn portfolio_risk(
        &self,
        ctx: &TaskContext,
        trace_id: Option<Uuid>,
    ) -> Result<AgentResponse> {
        let agent = AgentType::RiskAssessment;
        let mut reasoning = Vec::new();

        let equity = ctx.get_f64("equity_percent").unwrap_or(60.0);
        let debt = ctx.get_f64("debt_percent").unwrap_or(30.0);
        let other = (100.0 - equity - debt).max(0.0);

        // Coarse volatility proxy from asset-class weights.
        let volatility = (equity * 0.18 + debt * 0.06 + other * 0.10) / 100.0 * 100.0;
        let exposure = if equity > 70.0 {
            "equity-heavy"
        } else if equity < 35.0 {
            "defensive"
        } else {
            "balanced"
        };

        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                format!(
                    "portfolio is {} with {:.0}% equity, est. volatility {:.1}%",
                    exposure, equity, volatility
                ),
            )
            .await;

        let mut result = json!({
            "equity_percent": equity,
            "debt_percent": debt,
            "other_percent": other,
            "estimated_volatility_percent": (volatility * 10.0).round() / 10.0,
            "exposure": exposure,
        });

        if ctx.contains_key("age") {
            let scored = self
                .services
                .call_tool(agent, trace_id, "risk_score", &Self::score_args(ctx))
                .await?;
            let bucket = scored
                .get("risk_bucket")
                .and_then(Value::as_str)
                .unwrap_or("moderate");
            let aligned = matches!(
                (bucket, exposure),
                ("aggressive", "equity-heavy")
                    | ("moderate", "balanced")
                    | ("conservative", "defensive")
            );
            self.services
                .reason(
                    agent,
                    trace_id,
                    &mut reasoning,
                    format!(
                        "allocation {} the {} risk profile",
                        if aligned { "matches" } else { "diverges from" },
                        bucket
                    ),
                )
                .await;
            result["risk_bucket"] = json!(bucket);
            result["allocation_aligned"] = json!(aligned);

            return Ok(AgentResponse::success(
                result,
                reasoning,
                vec!["risk_score".to_string()],
                0.85,
            ));
        }

        Ok(AgentResponse::success(result, reasoning, Vec::new(), 0.75))
    }

    async fn affordability_risk(
        &self,
        ctx: &TaskContext,
        trace_id: Option<Uuid>,
    ) -> Result<AgentResponse> {
        let agent = AgentType::RiskAssessment;
        let mut reasoning = Vec::new();

        let principal = ctx.get_f64("amount").ok_or_else(|| {
            OrchestrationError::AgentExecution(
                "affordability_risk requires a loan amount".to_string(),
            )
        })?;
        let loan_type = ctx.get_str("loan_type").unwrap_or("personal").to_string();
        let (default_rate, default_tenure) = loan_terms(&loan_type);
        let rate = ctx.get_f64("annual_rate").unwrap_or(default_rate);
        let tenure = ctx.get_f64("timeline_years").unwrap_or(default_tenure);

        let emi_result = self
            .services
            .call_tool(
                agent,
                trace_id,
                "calculate_emi",
                &json!({
                    "principal": principal,
                    "annual_rate": rate,
                    "tenure_years": tenure,
                }),
            )
            .await?;
        let emi = emi_result.get("emi").and_then(Value::as_f64).unwrap_or(0.0);

        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                format!(
                    "a {} loan of {:.0} at {}% over {} years costs {:.0} per month",
                    loan_type, principal, rate, tenure, emi
                ),
            )
            .await;

        let mut result = json!({
            "loan_type": loan_type,
            "principal": principal,
            "annual_rate": rate,
            "tenure_years": tenure,
            "emi": emi_result,
        });

        let mut next_actions = Vec::new();
        if let Some(income) = ctx.get_f64("monthly_income") {
            let ratio = if income > 0.0 { emi / income * 100.0 } else { 100.0 };
            let verdict = if ratio < 35.0 {
                "comfortable"
            } else if ratio < 45.0 {
                "stretched"
            } else {
                "unaffordable"
            };
            self.services
                .reason(
                    agent,
                    trace_id,
                    &mut reasoning,
                    format!("EMI takes {:.1}% of income, {}", ratio, verdict),
                )
                .await;
            result["emi_to_income_percent"] = json!((ratio * 10.0).round() / 10.0);
            result["verdict"] = json!(verdict);
            if verdict != "comfortable" {
                next_actions
                    .push("consider a longer tenure or larger down payment".to_string());
            }
        } else {
            next_actions.push("share monthly income to judge affordability".to_string());
        }

        Ok(
            AgentResponse::success(result, reasoning, vec!["calculate_emi".to_string()], 0.85)
                .with_next_actions(next_actions),
        )
    }
}

#[async_trait::async_trait]
impl Agent for RiskAssessmentAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::RiskAssessment
    }

    fn can_handle(&self, task: &str) -> bool {
        matches!(
            task,
            "assess_overall_risk" | "portfolio_risk" | "affordability_risk"
        )
    }

    async fn execute(&self, message: &AgentMessage) -> AgentResponse {
        let task = message.payload.task.as_str();
        let ctx = &message.payload.context;
        let trace_id = ctx.trace_id();

        let outcome = match task {
            "assess_overall_risk" => self.assess_overall_risk(ctx, trace_id).await,
            "portfolio_risk" => self.portfolio_risk(ctx, trace_id).await,
            "affordability_risk" => self.affordability_risk(ctx, trace_id).await,
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
