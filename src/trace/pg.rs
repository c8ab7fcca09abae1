//! Postgres-backed trace store.
//!
//! Step rows are inserted when an agent starts and updated when it
//! resolves, so a crash mid-step still leaves a row behind. Reads only
//! surface resolved rows (duration_ms set).

use super::{StepOutcome, TraceStore};
use crate::error::OrchestrationError;
use crate::models::{AgentPerformance, AgentType, DecisionTrace, DecisionTraceStep};
use crate::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;

pub struct PgTraceStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgTraceStore {
    /// Builds a store on a lazy pool. No connection is attempted until
    /// the first query runs.
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(url)
            .map_err(|e| {
                OrchestrationError::Database(format!("Failed to create postgres pool: {}", e))
            })?;

        Ok(Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS decision_traces (
                      trace_id UUID PRIMARY KEY,
                      user_id UUID,
                      query TEXT NOT NULL,
                      started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      completed_at TIMESTAMPTZ,
                      success BOOLEAN NOT NULL DEFAULT TRUE,
                      feedback TEXT
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS decision_trace_steps (
                      trace_id UUID NOT NULL,
                      agent TEXT NOT NULL,
                      attempt INTEGER NOT NULL,
                      input TEXT NOT NULL DEFAULT 'null',
                      output TEXT,
                      reasoning TEXT[] NOT NULL DEFAULT '{}',
                      tools_used TEXT[] NOT NULL DEFAULT '{}',
                      success BOOLEAN NOT NULL DEFAULT FALSE,
                      duration_ms BIGINT,
                      started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      error TEXT,
                      PRIMARY KEY (trace_id, agent, attempt)
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_decision_traces_user_time
                    ON decision_traces (user_id, started_at);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                OrchestrationError::Database(format!(
                    "Failed to initialize decision trace schema: {}",
                    e
                ))
            })?;

        Ok(())
    }

    fn agent_from_db(agent: &str) -> AgentType {
        match agent.to_lowercase().as_str() {
            "financial_planning" => AgentType::FinancialPlanning,
            "risk_assessment" => AgentType::RiskAssessment,
            "investment_advisor" => AgentType::InvestmentAdvisor,
            "simulation" => AgentType::Simulation,
            "financial_graph" => AgentType::FinancialGraph,
            "action_execution" => AgentType::ActionExecution,
            "monitoring_alerting" => AgentType::MonitoringAlerting,
            _ => AgentType::Orchestrator,
        }
    }
}

#[async_trait::async_trait]
impl TraceStore for PgTraceStore {
    async fn create_trace(&self, trace: DecisionTrace) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO decision_traces (trace_id, user_id, query, started_at, success)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (trace_id) DO NOTHING
            "#,
        )
        .bind(trace.trace_id)
        .bind(trace.user_id)
        .bind(&trace.query)
        .bind(trace.started_at)
        .bind(trace.success)
        .execute(&self.pool)
        .await
        .map_err(|e| OrchestrationError::Database(format!("Failed to create trace: {}", e)))?;

        Ok(())
    }

    async fn start_step(
        &self,
        trace_id: Uuid,
        agent: AgentType,
        attempt: u32,
        input: Value,
    ) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO decision_trace_steps (trace_id, agent, attempt, input, started_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (trace_id, agent, attempt) DO NOTHING
            "#,
        )
        .bind(trace_id)
        .bind(agent.as_str())
        .bind(attempt as i32)
        .bind(input.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| OrchestrationError::Database(format!("Failed to start trace step: {}", e)))?;

        Ok(())
    }

    async fn finish_step(
        &self,
        trace_id: Uuid,
        agent: AgentType,
        attempt: u32,
        outcome: StepOutcome,
    ) -> Result<()> {
        self.ensure_schema().await?;

        let result = sqlx::query(
            r#"
            UPDATE decision_trace_steps
            SET output = $4,
                reasoning = CASE WHEN cardinality($5::TEXT[]) > 0 THEN $5 ELSE reasoning END,
                tools_used = $6,
                success = $7,
                duration_ms = $8,
                error = COALESCE($9, error)
            WHERE trace_id = $1 AND agent = $2 AND attempt = $3
            "#,
        )
        .bind(trace_id)
        .bind(agent.as_str())
        .bind(attempt as i32)
        .bind(outcome.output.to_string())
        .bind(&outcome.reasoning)
        .bind(&outcome.tools_used)
        .bind(outcome.success)
        .bind(outcome.duration_ms as i64)
        .bind(&outcome.error)
        .execute(&self.pool)
        .await
        .map_err(|e| OrchestrationError::Database(format!("Failed to finish trace step: {}", e)))?;

        if result.rows_affected() == 0 {
            // Finish without a prior start; record the full row directly.
            sqlx::query(
                r#"
                INSERT INTO decision_trace_steps
                  (trace_id, agent, attempt, output, reasoning, tools_used, success, duration_ms, started_at, error)
                VALUES
                  ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (trace_id, agent, attempt) DO NOTHING
                "#,
            )
            .bind(trace_id)
            .bind(agent.as_str())
            .bind(attempt as i32)
            .bind(outcome.output.to_string())
            .bind(&outcome.reasoning)
            .bind(&outcome.tools_used)
            .bind(outcome.success)
            .bind(outcome.duration_ms as i64)
            .bind(Utc::now())
            .bind(&outcome.error)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                OrchestrationError::Database(format!("Failed to insert trace step: {}", e))
            })?;
        }

        Ok(())
    }

    async fn append_reasoning(&self, trace_id: Uuid, agent: AgentType, line: String) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            UPDATE decision_trace_steps
            SET reasoning = array_append(reasoning, $3)
            WHERE trace_id = $1 AND agent = $2
              AND attempt = (
                SELECT MAX(attempt) FROM decision_trace_steps
                WHERE trace_id = $1 AND agent = $2
              )
            "#,
        )
        .bind(trace_id)
        .bind(agent.as_str())
        .bind(&line)
        .execute(&self.pool)
        .await
        .map_err(|e| OrchestrationError::Database(format!("Failed to append reasoning: {}", e)))?;

        Ok(())
    }

    async fn append_error(&self, trace_id: Uuid, agent: AgentType, error: String) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            UPDATE decision_trace_steps
            SET error = $3
            WHERE trace_id = $1 AND agent = $2
              AND attempt = (
                SELECT MAX(attempt) FROM decision_trace_steps
                WHERE trace_id = $1 AND agent = $2
              )
            "#,
        )
        .bind(trace_id)
        .bind(agent.as_str())
        .bind(&error)
        .execute(&self.pool)
        .await
        .map_err(|e| OrchestrationError::Database(format!("Failed to append step error: {}", e)))?;

        Ok(())
    }

    async fn complete_trace(&self, trace_id: Uuid) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            UPDATE decision_traces
            SET completed_at = NOW(),
                success = NOT EXISTS (
                  SELECT 1 FROM decision_trace_steps s
                  WHERE s.trace_id = decision_traces.trace_id
                    AND s.duration_ms IS NOT NULL
                    AND NOT s.success
                    AND s.attempt = (
                      SELECT MAX(m.attempt) FROM decision_trace_steps m
                      WHERE m.trace_id = s.trace_id
                        AND m.agent = s.agent
                        AND m.duration_ms IS NOT NULL
                    )
                )
            WHERE trace_id = $1
            "#,
        )
        .bind(trace_id)
        .execute(&self.pool)
        .await
        .map_err(|e| OrchestrationError::Database(format!("Failed to complete trace: {}", e)))?;

        Ok(())
    }

    async fn get_trace(&self, trace_id: Uuid) -> Result<Option<DecisionTrace>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            SELECT trace_id, user_id, query, started_at, completed_at, success, feedback
            FROM decision_traces
            WHERE trace_id = $1
            "#,
        )
        .bind(trace_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| OrchestrationError::Database(format!("Failed to load trace: {}", e)))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut trace = DecisionTrace {
            trace_id,
            user_id: row.try_get("user_id").ok(),
            query: row.try_get("query").unwrap_or_default(),
            steps: Vec::new(),
            started_at: row.try_get("started_at").unwrap_or_else(|_| Utc::now()),
            completed_at: row.try_get("completed_at").ok(),
            success: row.try_get("success").unwrap_or(true),
            feedback: row.try_get("feedback").ok(),
        };

        let rows = sqlx::query(
            r#"
            SELECT agent, attempt, input, output, reasoning, tools_used, success, duration_ms, started_at, error
            FROM decision_trace_steps
            WHERE trace_id = $1 AND duration_ms IS NOT NULL
            ORDER BY started_at ASC, attempt ASC
            "#,
        )
        .bind(trace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OrchestrationError::Database(format!("Failed to load trace steps: {}", e)))?;

        for row in rows {
            let agent: String = row
                .try_get("agent")
                .unwrap_or_else(|_| "orchestrator".to_string());
            let attempt: i32 = row.try_get("attempt").unwrap_or(1);
            let input: String = row.try_get("input").unwrap_or_else(|_| "null".to_string());
            let output: String = row.try_get("output").unwrap_or_else(|_| "null".to_string());
            let duration_ms: i64 = row.try_get("duration_ms").unwrap_or(0);

            trace.steps.push(DecisionTraceStep {
                agent: Self::agent_from_db(&agent),
                attempt: attempt.max(1) as u32,
                input: serde_json::from_str(&input).unwrap_or(Value::Null),
                output: serde_json::from_str(&output).unwrap_or(Value::Null),
                reasoning: row.try_get("reasoning").unwrap_or_default(),
                tools_used: row.try_get("tools_used").unwrap_or_default(),
                success: row.try_get("success").unwrap_or(false),
                duration_ms: duration_ms.max(0) as u64,
                timestamp: row.try_get("started_at").unwrap_or_else(|_| Utc::now()),
                error: row.try_get("error").ok(),
            });
        }

        Ok(Some(trace))
    }

    async fn recent_trace_ids(&self, user_id: Uuid, limit: usize) -> Result<Vec<Uuid>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT trace_id FROM decision_traces
            WHERE user_id = $1
            ORDER BY started_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OrchestrationError::Database(format!("Failed to list recent traces: {}", e)))?;

        Ok(rows
            .iter()
            .filter_map(|row| row.try_get("trace_id").ok())
            .collect())
    }

    async fn record_feedback(&self, trace_id: Uuid, feedback: String) -> Result<()> {
        self.ensure_schema().await?;

        let result = sqlx::query("UPDATE decision_traces SET feedback = $2 WHERE trace_id = $1")
            .bind(trace_id)
            .bind(&feedback)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                OrchestrationError::Database(format!("Failed to record feedback: {}", e))
            })?;

        if result.rows_affected() == 0 {
            return Err(OrchestrationError::TraceNotFound(trace_id.to_string()));
        }
        Ok(())
    }

    async fn agent_metrics(&self) -> Result<Vec<AgentPerformance>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT agent,
                   COUNT(*) AS executions,
                   COUNT(*) FILTER (WHERE success) AS successes,
                   AVG(duration_ms)::FLOAT8 AS avg_duration_ms,
                   AVG(COALESCE((output::JSONB ->> 'confidence')::FLOAT8, 0.0)) AS avg_confidence
            FROM decision_trace_steps
            WHERE duration_ms IS NOT NULL
            GROUP BY agent
            ORDER BY agent
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            OrchestrationError::Database(format!("Failed to aggregate agent metrics: {}", e))
        })?;

        let mut metrics = Vec::with_capacity(rows.len());
        for row in rows {
            let agent: String = row
                .try_get("agent")
                .unwrap_or_else(|_| "orchestrator".to_string());
            let executions: i64 = row.try_get("executions").unwrap_or(0);
            let successes: i64 = row.try_get("successes").unwrap_or(0);

            metrics.push(AgentPerformance {
                agent_type: Self::agent_from_db(&agent),
                executions: executions.max(0) as u64,
                successes: successes.max(0) as u64,
                failures: (executions - successes).max(0) as u64,
                avg_duration_ms: row.try_get("avg_duration_ms").unwrap_or(0.0),
                avg_confidence: row.try_get("avg_confidence").unwrap_or(0.0),
            });
        }
        Ok(metrics)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            DELETE FROM decision_trace_steps
            WHERE trace_id IN (SELECT trace_id FROM decision_traces WHERE started_at < $1)
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| OrchestrationError::Database(format!("Failed to prune trace steps: {}", e)))?;

        let result = sqlx::query("DELETE FROM decision_traces WHERE started_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| OrchestrationError::Database(format!("Failed to prune traces: {}", e)))?;

        Ok(result.rows_affected())
    }
}
