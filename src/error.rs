//! Error types for the advisory orchestration engine

use thiserror::Error;

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Tool Errors
    // =============================

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool already registered: {0}")]
    ToolAlreadyRegistered(String),

    #[error("Tool schema rejected for '{tool}': {reason}")]
    ToolSchemaInvalid { tool: String, reason: String },

    #[error("Tool input validation failed for '{tool}': {}", violations.join("; "))]
    ToolValidation {
        tool: String,
        violations: Vec<String>,
    },

    #[error("Tool '{tool}' timed out after {timeout_ms}ms")]
    ToolTimeout { tool: String, timeout_ms: u64 },

    #[error("Tool '{tool}' failed after {attempts} attempts: {source_message}")]
    ToolExecution {
        tool: String,
        attempts: u32,
        source_message: String,
    },

    // =============================
    // Agent / Plan Errors
    // =============================

    #[error("Agent not found: {agent}. Available agents: {available}")]
    AgentNotFound { agent: String, available: String },

    #[error("Agent already registered: {0}")]
    AgentAlreadyRegistered(String),

    #[error("Agent execution error: {0}")]
    AgentExecution(String),

    #[error("Invalid execution plan: {}", errors.join("; "))]
    PlanValidation { errors: Vec<String> },

    #[error("Unknown intent: {0}")]
    UnknownIntent(String),

    // =============================
    // Trace / Collaborator Errors
    // =============================

    #[error("Trace not found: {0}")]
    TraceNotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("LLM error: {0}")]
    Llm(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestrationError {
    /// Short stable code used in failure responses and trace rows.
    pub fn code(&self) -> &'static str {
        match self {
            OrchestrationError::ToolNotFound(_) => "TOOL_NOT_FOUND",
            OrchestrationError::ToolAlreadyRegistered(_) => "TOOL_ALREADY_REGISTERED",
            OrchestrationError::ToolSchemaInvalid { .. } => "TOOL_SCHEMA_INVALID",
            OrchestrationError::ToolValidation { .. } => "TOOL_VALIDATION_ERROR",
            OrchestrationError::ToolTimeout { .. } => "TOOL_TIMEOUT",
            OrchestrationError::ToolExecution { .. } => "TOOL_EXECUTION_ERROR",
            OrchestrationError::AgentNotFound { .. } => "AGENT_NOT_FOUND",
            OrchestrationError::AgentAlreadyRegistered(_) => "AGENT_ALREADY_REGISTERED",
            OrchestrationError::AgentExecution(_) => "AGENT_EXECUTION_ERROR",
            OrchestrationError::PlanValidation { .. } => "PLAN_VALIDATION_ERROR",
            OrchestrationError::UnknownIntent(_) => "UNKNOWN_INTENT",
            OrchestrationError::TraceNotFound(_) => "TRACE_NOT_FOUND",
            OrchestrationError::Database(_) => "DATABASE_ERROR",
            OrchestrationError::Retrieval(_) => "RETRIEVAL_ERROR",
            OrchestrationError::Llm(_) => "LLM_ERROR",
            OrchestrationError::Serialization(_) => "SERIALIZATION_ERROR",
            OrchestrationError::Http(_) => "HTTP_ERROR",
            OrchestrationError::Io(_) => "IO_ERROR",
        }
    }
}
