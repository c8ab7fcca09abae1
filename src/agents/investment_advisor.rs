//! Investment advisor agent
//!
//! Maps a risk bucket to a model allocation and projects what that mix
//! earns. Prefers the risk assessment recorded earlier in the shared
//! context over recomputing one.

use super::{handle_error, Agent, AgentServices};
use crate::context::TaskContext;
use crate::error::OrchestrationError;
use crate::models::{AgentMessage, AgentResponse, AgentType};
use crate::Result;
use serde_json::{json, Value};
use uuid::Uuid;

/// Model allocations per bucket: (equity, debt, gold, cash) percents.
fn model_allocation(bucket: &str) -> (f64, f64, f64, f64) {
    match bucket {
        "conservative" => (30.0, 55.0, 10.0, 5.0),
        "aggressive" => (75.0, 15.0, 5.0, 5.0),
        _ => (55.0, 30.0, 10.0, 5.0),
    }
}

/// Long-run return assumptions per asset class, in percent.
const EQUITY_RETURN: f64 = 13.0;
const DEBT_RETURN: f64 = 7.0;
const GOLD_RETURN: f64 = 8.0;
const CASH_RETURN: f64 = 4.0;

fn blended_return(equity: f64, debt: f64, gold: f64, cash: f64) -> f64 {
    (equity * EQUITY_RETURN + debt * DEBT_RETURN + gold * GOLD_RETURN + cash * CASH_RETURN) / 100.0
}

fn fund_categories(bucket: &str) -> Vec<&'static str> {
    match bucket {
        "conservative" => vec!["short-duration debt funds", "conservative hybrid funds"],
        "aggressive" => vec!["index funds", "flexi-cap equity funds", "mid-cap funds"],
        _ => vec!["index funds", "balanced advantage funds", "corporate bond funds"],
    }
}

pub struct InvestmentAdvisorAgent {
    services: AgentServices,
}

impl InvestmentAdvisorAgent {
    pub fn new(services: AgentServices) -> Self {
        Self { services }
    }

    /// Risk bucket from the shared context if risk assessment already
    /// ran, else scored fresh, else the stated preference.
    async fn resolve_bucket(
        &self,
        ctx: &TaskContext,
        trace_id: Option<Uuid>,
        reasoning: &mut Vec<String>,
        tools_used: &mut Vec<String>,
    ) -> Result<String> {
        let agent = AgentType::InvestmentAdvisor;

        if let Some(bucket) = ctx
            .step_result(AgentType::RiskAssessment)
            .and_then(|r| r.get("risk_bucket"))
            .and_then(Value::as_str)
        {
            self.services
                .reason(
                    agent,
                    trace_id,
                    reasoning,
                    format!("using the {} bucket from the earlier risk assessment", bucket),
                )
                .await;
            return Ok(bucket.to_string());
        }

        if let Some(age) = ctx.get_u64("age") {
            let mut args = json!({"age": age as i64});
            if let Some(horizon) = ctx.get_f64("timeline_years") {
                args["investment_horizon_years"] = json!(horizon);
            }
            let scored = self
                .services
                .call_tool(agent, trace_id, "risk_score", &args)
                .await?;
            tools_used.push("risk_score".to_string());
            let bucket = scored
                .get("risk_bucket")
                .and_then(Value::as_str)
                .unwrap_or("moderate")
                .to_string();
            self.services
                .reason(
                    agent,
                    trace_id,
                    reasoning,
                    format!("scored a fresh {} risk bucket from the profile", bucket),
                )
                .await;
            return Ok(bucket);
        }

        let stated = ctx.get_str("risk_tolerance").unwrap_or("moderate").to_string();
        self.services
            .reason(
                agent,
                trace_id,
                reasoning,
                format!("no profile data, using stated {} tolerance", stated),
            )
            .await;
        Ok(stated)
    }

    async fn recommend_portfolio(
        &self,
        ctx: &TaskContext,
        trace_id: Option<Uuid>,
    ) -> Result<AgentResponse> {
        let agent = AgentType::InvestmentAdvisor;
        let mut reasoning = Vec::new();
        let mut tools_used = Vec::new();

        let bucket = self
            .resolve_bucket(ctx, trace_id, &mut reasoning, &mut tools_used)
            .await?;
        let (equity, debt, gold, cash) = model_allocation(&bucket);
        let expected_return = blended_return(equity, debt, gold, cash);

        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                format!(
                    "{} allocation: {:.0}% equity / {:.0}% debt, expected {:.1}% a year",
                    bucket, equity, debt, expected_return
                ),
            )
            .await;

        let mut result = json!({
            "risk_bucket": bucket,
            "allocation": {
                "equity_percent": equity,
                "debt_percent": debt,
                "gold_percent": gold,
                "cash_percent": cash,
            },
            "expected_annual_return_percent": (expected_return * 10.0).round() / 10.0,
            "fund_categories": fund_categories(&bucket),
        });

        if let (Some(monthly), Some(years)) = (
            ctx.get_f64("monthly_investment").or_else(|| {
                ctx.step_result(AgentType::FinancialPlanning)
                    .and_then(|r| r.get("required_monthly_investment"))
                    .and_then(Value::as_f64)
            }),
            ctx.get_f64("timeline_years"),
        ) {
            let projection = self
                .services
                .call_tool(
                    agent,
                    trace_id,
                    "project_growth",
                    &json!({
                        "monthly_investment": monthly,
                        "annual_return_percent": expected_return,
                        "years": years,
                    }),
                )
                .await?;
            tools_used.push("project_growth".to_string());
            result["projection"] = projection;
        }

        let next_actions = vec![
            format!("allocate {:.0}% to equity via {}", equity, fund_categories(&bucket)[0]),
            "rebalance when any class drifts more than 5%".to_string(),
        ];

        Ok(AgentResponse::success(result, reasoning, tools_used, 0.85)
            .with_next_actions(next_actions))
    }

    async fn suggest_rebalance(
        &self,
        ctx: &TaskContext,
        trace_id: Option<Uuid>,
    ) -> Result<AgentResponse> {
        let agent = AgentType::InvestmentAdvisor;
        let mut reasoning = Vec::new();
        let mut tools_used = Vec::new();

        let bucket = self
            .resolve_bucket(ctx, trace_id, &mut reasoning, &mut tools_used)
            .await?;
        let (equity_t, debt_t, gold_t, cash_t) = model_allocation(&bucket);

        let equity = ctx.get_f64("equity_percent").unwrap_or(equity_t);
        let debt = ctx.get_f64("debt_percent").unwrap_or(debt_t);
        let gold = ctx.get_f64("gold_percent").unwrap_or(gold_t);
        let cash = (100.0 - equity - debt - gold).max(0.0);

        let mut moves = Vec::new();
        for (class, current, target) in [
            ("equity", equity, equity_t),
            ("debt", debt, debt_t),
            ("gold", gold, gold_t),
            ("cash", cash, cash_t),
        ] {
            let drift = current - target;
            if drift.abs() > 5.0 {
                moves.push(json!({
                    "asset_class": class,
                    "current_percent": current,
                    "target_percent": target,
                    "action": if drift > 0.0 { "reduce" } else { "increase" },
                    "by_percent": (drift.abs() * 10.0).round() / 10.0,
                }));
            }
        }

        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                if moves.is_empty() {
                    "allocation is within the 5% drift band".to_string()
                } else {
                    format!("{} asset classes drifted past 5%", moves.len())
                },
            )
            .await;

        let balanced = moves.is_empty();
        let result = json!({
            "risk_bucket": bucket,
            "balanced": balanced,
            "moves": moves,
        });

        let next_actions = if balanced {
            vec!["no rebalance needed, review next quarter".to_string()]
        } else {
            vec!["execute the rebalance moves in a single batch to limit churn".to_string()]
        };

        Ok(AgentResponse::success(result, reasoning, tools_used, 0.8)
            .with_next_actions(next_actions))
    }

    async fn evaluate_holdings(
        &self,
        ctx: &TaskContext,
        trace_id: Option<Uuid>,
    ) -> Result<AgentResponse> {
        let agent = AgentType::InvestmentAdvisor;
        let mut reasoning = Vec::new();

        let holdings = ctx
            .get("holdings")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| {
                OrchestrationError::AgentExecution(
                    "evaluate_holdings requires a holdings list".to_string(),
                )
            })?;

        let total: f64 = holdings
            .iter()
            .filter_map(|h| h.get("value").and_then(Value::as_f64))
            .sum();
        if total <= 0.0 {
            return Err(OrchestrationError::AgentExecution(
                "holdings have no positive market value".to_string(),
            ));
        }

        let mut flagged = Vec::new();
        let mut weights = Vec::new();
        for holding in &holdings {
            let name = holding.get("name").and_then(Value::as_str).unwrap_or("unnamed");
            let value = holding.get("value").and_then(Value::as_f64).unwrap_or(0.0);
            let weight = value / total * 100.0;
            weights.push(json!({
                "name": name,
                "weight_percent": (weight * 10.0).round() / 10.0,
            }));
            if weight > 25.0 {
                flagged.push(name.to_string());
            }
        }

        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                format!(
                    "{} holdings worth {:.0}, {} concentration flags",
                    holdings.len(),
                    total,
                    flagged.len()
                ),
            )
            .await;

        let diversified = flagged.is_empty();
        let result = json!({
            "total_value": total,
            "weights": weights,
            "concentration_flags": flagged,
        });

        let next_actions = if diversified {
            vec!["holdings are reasonably diversified".to_string()]
        } else {
            vec!["trim flagged positions below 25% of the portfolio".to_string()]
        };

        Ok(AgentResponse::success(result, reasoning, Vec::new(), 0.8)
            .with_next_actions(next_actions))
    }
}

#[async_trait::async_trait]
impl Agent for InvestmentAdvisorAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::InvestmentAdvisor
    }

    fn can_handle(&self, task: &str) -> bool {
        matches!(
            task,
            "recommend_portfolio" | "suggest_rebalance" | "evaluate_holdings"
        )
    }

    async fn execute(&self, message: &AgentMessage) -> AgentResponse {
        let task = message.payload.task.as_str();
        let ctx = &message.payload.context;
        let trace_id = ctx.trace_id();

        let outcome = match task {
            "recommend_portfolio" => self.recommend_portfolio(ctx, trace_id).await,
            "suggest_rebalance" => self.suggest_rebalance(ctx, trace_id).await,
            "evaluate_holdings" => self.evaluate_holdings(ctx, trace_id).await,
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

    fn agent() -> InvestmentAdvisorAgent {
        let services = AgentServices::new(
            Arc::new(create_default_registry().unwrap()),
            Arc::new(DecisionTraceService::in_memory()),
        );
        InvestmentAdvisorAgent::new(services)
    }

    fn message(task: &str, ctx: TaskContext) -> AgentMessage {
        AgentMessage::request(
            AgentType::Orchestrator,
            vec![AgentType::InvestmentAdvisor],
            task,
            ctx,
        )
    }

    #[tokio::test]
    async fn bucket_from_upstream_risk_assessment_is_preferred() {
        let mut ctx = TaskContext::new();
        // An earlier sequential step left its result in the context.
        ctx.record_step_outcome(
            AgentType::RiskAssessment,
            json!({"risk_bucket": "conservative", "risk_score": 30}),
            true,
        );
        // Conflicting profile data must not override the upstream result.
        ctx.insert("age", json!(25));

        let response = agent().execute(&message("recommend_portfolio", ctx)).await;
        assert!(response.success);
        assert_eq!(response.result["risk_bucket"], json!("conservative"));
        assert_eq!(
            response.result["allocation"]["equity_percent"],
            json!(30.0)
        );
        assert!(response.tools_used.is_empty());
        assert!(response.reasoning[0].contains("earlier risk assessment"));
    }

    #[tokio::test]
    async fn fresh_score_is_used_when_no_upstream_result_exists() {
        let mut ctx = TaskContext::new();
        ctx.insert("age", json!(27));
        ctx.insert("timeline_years", json!(15.0));

        let response = agent().execute(&message("recommend_portfolio", ctx)).await;
        assert!(response.success);
        assert_eq!(response.result["risk_bucket"], json!("aggressive"));
        assert!(response.tools_used.contains(&"risk_score".to_string()));
    }

    #[tokio::test]
    async fn rebalance_flags_large_drift_only() {
        let mut ctx = TaskContext::new();
        ctx.insert("risk_tolerance", json!("moderate"));
        ctx.insert("equity_percent", json!(70.0));
        ctx.insert("debt_percent", json!(20.0));
        ctx.insert("gold_percent", json!(8.0));

        let response = agent().execute(&message("suggest_rebalance", ctx)).await;
        assert!(response.success);
        assert_eq!(response.result["balanced"], json!(false));

        let moves = response.result["moves"].as_array().unwrap();
        let classes: Vec<&str> = moves
            .iter()
            .map(|m| m["asset_class"].as_str().unwrap())
            .collect();
        // Equity 70 vs 55 and debt 20 vs 30 drifted; gold 8 vs 10 did not.
        assert!(classes.contains(&"equity"));
        assert!(classes.contains(&"debt"));
        assert!(!classes.contains(&"gold"));
    }

    #[tokio::test]
    async fn holdings_concentration_is_flagged() {
        let mut ctx = TaskContext::new();
        ctx.insert(
            "holdings",
            json!([
                {"name": "RELIANCE", "value": 600000.0},
                {"name": "HDFCBANK", "value": 200000.0},
                {"name": "TCS", "value": 200000.0},
            ]),
        );

        let response = agent().execute(&message("evaluate_holdings", ctx)).await;
        assert!(response.success);
        assert_eq!(
            response.result["concentration_flags"],
            json!(["RELIANCE"])
        );
    }
}
