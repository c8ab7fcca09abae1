use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::context::TaskContext;
use crate::error::{OrchestrationError, Result};
use crate::models::{
    AgentType, ExecutionMode, ExecutionPlan, ExecutionStep, PlanMetadata, PlanValidation,
};

// ================= WORKFLOW CATALOGUE =================

/// How many times a failed step may be retried at the plan level.
pub const STEP_MAX_RETRIES: u32 = 2;

struct WorkflowTemplate {
    intent: &'static str,
    agents: &'static [AgentType],
    mode: ExecutionMode,
}

const WORKFLOWS: &[WorkflowTemplate] = &[
    WorkflowTemplate {
        intent: "goal_planning",
        agents: &[
            AgentType::FinancialPlanning,
            AgentType::RiskAssessment,
            AgentType::InvestmentAdvisor,
            AgentType::Simulation,
            AgentType::ActionExecution,
        ],
        mode: ExecutionMode::Sequential,
    },
    WorkflowTemplate {
        intent: "portfolio_review",
        agents: &[
            AgentType::InvestmentAdvisor,
            AgentType::RiskAssessment,
            AgentType::FinancialGraph,
        ],
        mode: ExecutionMode::Parallel,
    },
    WorkflowTemplate {
        intent: "risk_assessment",
        agents: &[AgentType::RiskAssessment, AgentType::Simulation],
        mode: ExecutionMode::Sequential,
    },
    WorkflowTemplate {
        intent: "budget_analysis",
        agents: &[
            AgentType::FinancialGraph,
            AgentType::FinancialPlanning,
            AgentType::MonitoringAlerting,
        ],
        mode: ExecutionMode::Sequential,
    },
    WorkflowTemplate {
        intent: "loan_affordability",
        agents: &[
            AgentType::RiskAssessment,
            AgentType::Simulation,
            AgentType::FinancialPlanning,
        ],
        mode: ExecutionMode::Sequential,
    },
    WorkflowTemplate {
        intent: "comprehensive_analysis",
        agents: &[
            AgentType::FinancialPlanning,
            AgentType::RiskAssessment,
            AgentType::InvestmentAdvisor,
            AgentType::FinancialGraph,
            AgentType::Simulation,
            AgentType::MonitoringAlerting,
        ],
        mode: ExecutionMode::Sequential,
    },
];

/// The task each agent runs when a workflow does not say otherwise.
pub fn default_task(agent: AgentType) -> &'static str {
    match agent {
        AgentType::Orchestrator => "orchestrate",
        AgentType::FinancialPlanning => "create_goal_plan",
        AgentType::RiskAssessment => "assess_overall_risk",
        AgentType::InvestmentAdvisor => "recommend_portfolio",
        AgentType::Simulation => "run_projection",
        AgentType::FinancialGraph => "query_relationships",
        AgentType::ActionExecution => "prepare_actions",
        AgentType::MonitoringAlerting => "configure_alerts",
    }
}

/// Per-agent step timeout. Simulation sweeps scenarios and graph queries
/// touch external data, so both get more headroom than pure calculators.
pub fn default_timeout_ms(agent: AgentType) -> u64 {
    match agent {
        AgentType::Orchestrator => 60_000,
        AgentType::FinancialPlanning => 10_000,
        AgentType::RiskAssessment => 15_000,
        AgentType::InvestmentAdvisor => 10_000,
        AgentType::Simulation => 30_000,
        AgentType::FinancialGraph => 25_000,
        AgentType::ActionExecution => 15_000,
        AgentType::MonitoringAlerting => 10_000,
    }
}

// ================= PLAN BUILDER =================

/// Expands a classified intent into an ordered execution plan by looking up
/// the matching workflow template. Callers may override the agent roster,
/// which keeps the template's execution mode but swaps the lineup.
pub struct ExecutionPlanBuilder;

impl ExecutionPlanBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build_plan(
        &self,
        intent: &str,
        context: TaskContext,
        custom_agents: Option<Vec<AgentType>>,
    ) -> Result<ExecutionPlan> {
        let template = WORKFLOWS
            .iter()
            .find(|w| w.intent == intent)
            .ok_or_else(|| OrchestrationError::UnknownIntent(intent.to_string()))?;

        let agents: Vec<AgentType> = match custom_agents {
            Some(custom) => custom,
            None => template.agents.to_vec(),
        };

        let mut steps = Vec::with_capacity(agents.len());
        for (index, agent) in agents.iter().enumerate() {
            let dependencies = match template.mode {
                // Each step waits on its predecessor so context flows forward.
                ExecutionMode::Sequential if index > 0 => {
                    vec![format!("step_{}", index)]
                }
                _ => Vec::new(),
            };
            steps.push(ExecutionStep {
                step_id: format!("step_{}", index + 1),
                agent_type: *agent,
                task: default_task(*agent).to_string(),
                dependencies,
                timeout_ms: default_timeout_ms(*agent),
                retry_on_failure: true,
                max_retries: STEP_MAX_RETRIES,
            });
        }

        let estimated_duration_ms = match template.mode {
            ExecutionMode::Sequential => steps.iter().map(|s| s.timeout_ms).sum(),
            ExecutionMode::Parallel => steps.iter().map(|s| s.timeout_ms).max().unwrap_or(0),
        };

        debug!(
            intent = intent,
            steps = steps.len(),
            mode = ?template.mode,
            "built execution plan"
        );

        Ok(ExecutionPlan {
            metadata: PlanMetadata {
                total_steps: steps.len(),
                execution_mode: template.mode,
                estimated_duration_ms,
            },
            steps,
            context,
        })
    }

    /// Checks a plan for duplicate step ids, dangling dependencies and
    /// dependency cycles. Returns every problem found rather than the first.
    pub fn validate_plan(&self, plan: &ExecutionPlan) -> PlanValidation {
        let mut errors = Vec::new();

        let mut seen = HashSet::new();
        for step in &plan.steps {
            if !seen.insert(step.step_id.as_str()) {
                errors.push(format!("duplicate step id: {}", step.step_id));
            }
        }

        for step in &plan.steps {
            for dep in &step.dependencies {
                if !seen.contains(dep.as_str()) {
                    errors.push(format!(
                        "step {} depends on unknown step {}",
                        step.step_id, dep
                    ));
                }
            }
        }

        let graph: HashMap<String, Vec<String>> = plan
            .steps
            .iter()
            .map(|s| (s.step_id.clone(), s.dependencies.clone()))
            .collect();
        if let Some(cycle) = detect_cycle(&graph) {
            errors.push(format!("dependency cycle: {}", cycle.join(" -> ")));
        }

        PlanValidation {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Groups steps into batches where every step's dependencies live in an
    /// earlier batch. Steps sharing a batch can run concurrently, so the
    /// estimate charges each batch its slowest member.
    pub fn optimize_plan(&self, plan: &ExecutionPlan) -> OptimizedPlan {
        let mut batches: Vec<Vec<ExecutionStep>> = Vec::new();
        let mut placed: HashSet<String> = HashSet::new();
        let mut remaining: Vec<ExecutionStep> = plan.steps.clone();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<_>, Vec<_>) = remaining
                .into_iter()
                .partition(|s| s.dependencies.iter().all(|d| placed.contains(d)));
            if ready.is_empty() {
                // Unsatisfiable dependencies; validate_plan reports the cause.
                break;
            }
            for step in &ready {
                placed.insert(step.step_id.clone());
            }
            batches.push(ready);
            remaining = blocked;
        }

        let estimated_duration_ms = batches
            .iter()
            .map(|batch| batch.iter().map(|s| s.timeout_ms).max().unwrap_or(0))
            .sum();

        OptimizedPlan {
            batches,
            estimated_duration_ms,
        }
    }
}

impl Default for ExecutionPlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A plan regrouped into dependency-ordered batches.
#[derive(Debug, Clone)]
pub struct OptimizedPlan {
    pub batches: Vec<Vec<ExecutionStep>>,
    pub estimated_duration_ms: u64,
}

// ================= CYCLE DETECTION =================

fn detect_cycle(dependencies: &HashMap<String, Vec<String>>) -> Option<Vec<String>> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    let mut nodes: Vec<&String> = dependencies.keys().collect();
    nodes.sort();
    for node in nodes {
        if dfs_cycle(node, dependencies, &mut visited, &mut rec_stack, &mut path) {
            return Some(path);
        }
    }

    None
}

fn dfs_cycle(
    node: &str,
    graph: &HashMap<String, Vec<String>>,
    visited: &mut HashSet<String>,
    rec_stack: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> bool {
    if rec_stack.contains(node) {
        path.push(node.to_string());
        return true;
    }
    if visited.contains(node) {
        return false;
    }

    visited.insert(node.to_string());
    rec_stack.insert(node.to_string());
    path.push(node.to_string());

    if let Some(deps) = graph.get(node) {
        for dep in deps {
            if dfs_cycle(dep, graph, visited, rec_stack, path) {
                return true;
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    false
}

// ================= TESTS =================
