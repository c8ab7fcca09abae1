//! Monitoring and alerting agent
//!
//! Configures spending, drift, and goal-progress alerts, and runs
//! simple anomaly checks over monthly spending history.

use super::{handle_error, Agent, AgentServices};
use crate::context::TaskContext;
use crate::error::OrchestrationError;
use crate::models::{AgentMessage, AgentResponse, AgentType};
use crate::Result;
use serde_json::{json, Value};
use uuid::Uuid;

const SPENDING_ALERT_MULTIPLIER: f64 = 1.2;
const DRIFT_ALERT_PERCENT: f64 = 5.0;
const ANOMALY_MULTIPLIER: f64 = 1.5;

pub struct MonitoringAlertingAgent {
    services: AgentServices,
}

impl MonitoringAlertingAgent {
    pub fn new(services: AgentServices) -> Self {
        Self { services }
    }

    async fn configure_alerts(
        &self,
        ctx: &TaskContext,
        trace_id: Option<Uuid>,
    ) -> Result<AgentResponse> {
        let agent = AgentType::MonitoringAlerting;
        let mut reasoning = Vec::new();
        let mut alerts = Vec::new();

        if let Some(expenses) = ctx.get_f64("monthly_expenses") {
            let threshold = expenses * SPENDING_ALERT_MULTIPLIER;
            alerts.push(json!({
                "alert_type": "overspend",
                "threshold": (threshold * 100.0).round() / 100.0,
                "window": "monthly",
            }));
            self.services
                .reason(
                    agent,
                    trace_id,
                    &mut reasoning,
                    format!("overspend alert at {:.0} (120% of typical spend)", threshold),
                )
                .await;
        }

        if ctx.step_result(AgentType::InvestmentAdvisor).is_some()
            || ctx.contains_key("equity_percent")
        {
            alerts.push(json!({
                "alert_type": "allocation_drift",
                "threshold_percent": DRIFT_ALERT_PERCENT,
                "window": "weekly",
            }));
            self.services
                .reason(
                    agent,
                    trace_id,
                    &mut reasoning,
                    format!("allocation drift alert at {}%", DRIFT_ALERT_PERCENT),
                )
                .await;
        }

        if let Some(target) = ctx.get_f64("amount") {
            alerts.push(json!({
                "alert_type": "goal_progress",
                "target_amount": target,
                "window": "monthly",
            }));
        }

        if alerts.is_empty() {
            alerts.push(json!({
                "alert_type": "account_activity",
                "window": "weekly",
            }));
            self.services
                .reason(
                    agent,
                    trace_id,
                    &mut reasoning,
                    "no specific signals available, enabling the generic activity digest",
                )
                .await;
        }

        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                format!("{} alerts configured", alerts.len()),
            )
            .await;

        let result = json!({"alerts": alerts});

        Ok(AgentResponse::success(result, reasoning, Vec::new(), 0.8)
            .with_next_actions(vec![
                "alerts activate once the drafted actions are confirmed".to_string(),
            ]))
    }

    async fn detect_anomalies(
        &self,
        ctx: &TaskContext,
        trace_id: Option<Uuid>,
    ) -> Result<AgentResponse> {
        let agent = AgentType::MonitoringAlerting;
        let mut reasoning = Vec::new();

        let history = ctx
            .get("spending_history")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| {
                OrchestrationError::AgentExecution(
                    "detect_anomalies requires spending_history".to_string(),
                )
            })?;

        let totals: Vec<(String, f64)> = history
            .iter()
            .filter_map(|entry| {
                let month = entry.get("month").and_then(Value::as_str)?;
                let total = entry.get("total").and_then(Value::as_f64)?;
                Some((month.to_string(), total))
            })
            .collect();

        if totals.len() < 3 {
            return Err(OrchestrationError::AgentExecution(
                "need at least three months of history for anomaly detection".to_string(),
            ));
        }

        let mean = totals.iter().map(|(_, t)| t).sum::<f64>() / totals.len() as f64;
        let anomalies: Vec<Value> = totals
            .iter()
            .filter(|(_, total)| *total > mean * ANOMALY_MULTIPLIER)
            .map(|(month, total)| {
                json!({
                    "month": month,
                    "total": total,
                    "vs_mean_percent": ((total / mean - 1.0) * 1000.0).round() / 10.0,
                })
            })
            .collect();

        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                format!(
                    "mean monthly spend {:.0}, {} months flagged above {:.0}",
                    mean,
                    anomalies.len(),
                    mean * ANOMALY_MULTIPLIER
                ),
            )
            .await;

        let result = json!({
            "months_analyzed": totals.len(),
            "mean_monthly_spend": (mean * 100.0).round() / 100.0,
            "anomalies": anomalies,
        });

        Ok(AgentResponse::success(result, reasoning, Vec::new(), 0.85))
    }

    async fn summarize_activity(
        &self,
        ctx: &TaskContext,
        trace_id: Option<Uuid>,
    ) -> Result<AgentResponse> {
        let agent = AgentType::MonitoringAlerting;
        let mut reasoning = Vec::new();

        let mut reported = Vec::new();
        let mut failed = Vec::new();
        for kind in AgentType::SPECIALIZED {
            match ctx.step_succeeded(*kind) {
                Some(true) => reported.push(kind.as_str()),
                Some(false) => failed.push(kind.as_str()),
                None => {}
            }
        }

        self.services
            .reason(
                agent,
                trace_id,
                &mut reasoning,
                format!(
                    "{} agents reported this run, {} failed",
                    reported.len() + failed.len(),
                    failed.len()
                ),
            )
            .await;

        let result = json!({
            "agents_reported": reported,
            "agents_failed": failed,
        });

        Ok(AgentResponse::success(result, reasoning, Vec::new(), 0.75))
    }
}

#[async_trait::async_trait]
impl Agent for MonitoringAlertingAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::MonitoringAlerting
    }

    fn can_handle(&self, task: &str) -> bool {
        matches!(
            task,
            "configure_alerts" | "detect_anomalies" | "summarize_activity"
        )
    }

    async fn execute(&self, message: &AgentMessage) -> AgentResponse {
        let task = message.payload.task.as_str();
        let ctx = &message.payload.context;
        let trace_id = ctx.trace_id();

        let outcome = match task {
            "configure_alerts" => self.configure_alerts(ctx, trace_id).await,
            "detect_anomalies" => self.detect_anomalies(ctx, trace_id).await,
            "summarize_activity" => self.summarize_activity(ctx, trace_id).await,
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
