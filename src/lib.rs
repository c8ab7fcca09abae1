//! Advisory Agent Orchestration Engine
//!
//! A multi-agent advisory system that:
//! - Classifies free-text financial queries into intents
//! - Plans intent-specific workflows over specialized agents
//! - Executes plans with per-step timeouts and bounded retries
//! - Records every agent invocation on a decision trace
//! - Synthesizes agent findings into one advisory response
//!
//! ORCHESTRATION LOOP:
//! QUERY → RETRIEVE → ENRICH → CLASSIFY → PLAN → EXECUTE → SYNTHESIZE
//!
//! Specialized agents never talk to each other directly; all routing and
//! sequencing goes through the orchestrator, and every hop lands on the
//! shared decision trace.

pub mod agents;
pub mod api;
pub mod classifier;
pub mod context;
pub mod error;
pub mod llm;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod planner;
pub mod retrieval;
pub mod tools;
pub mod trace;

pub use error::{OrchestrationError, Result};

// Re-export common types
pub use context::TaskContext;
pub use models::*;
pub use orchestrator::OrchestratorAgent;
