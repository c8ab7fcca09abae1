//! REST API Server for the Advisory Orchestration Engine
//!
//! Exposes the orchestrator and the decision trace over HTTP
//! Integrates with frontend UI

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::context::TaskContext;
use crate::error::OrchestrationError;
use crate::models::UserContext;
use crate::orchestrator::OrchestratorAgent;
use crate::trace::DecisionTraceService;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OrchestrateRequest {
    pub query: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub context: Option<TaskContext>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FeedbackRequest {
    pub trace_id: Uuid,
    pub feedback: String,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<OrchestratorAgent>,
    pub trace: Arc<DecisionTraceService>,
}

/// =============================
/// Helpers: Stable User Ids
/// =============================

fn stable_uuid_from_string(input: &str) -> Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

fn parse_or_stable_uuid(value: Option<&str>, fallback_seed: &str) -> Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => {
            Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v))
        }
        _ => stable_uuid_from_string(fallback_seed),
    }
}

/// Absent or blank user ids stay anonymous so personalization layers
/// know to stand down; anything else maps to a stable UUID.
fn user_from_request(req: &OrchestrateRequest) -> UserContext {
    let mut user = match req.user_id.as_deref() {
        Some(raw) if !raw.trim().is_empty() => {
            UserContext::for_user(parse_or_stable_uuid(Some(raw), "anonymous-user"))
        }
        _ => UserContext::anonymous(),
    };
    if let Some(attributes) = &req.context {
        user.attributes = attributes.clone();
    }
    user
}

fn failure_response(error: &OrchestrationError) -> (StatusCode, Json<ApiResponse>) {
    let status = match error {
        OrchestrationError::TraceNotFound(_) => StatusCode::NOT_FOUND,
        OrchestrationError::UnknownIntent(_) | OrchestrationError::PlanValidation { .. } => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = ApiResponse::error(format!("{}: {}", error.code(), error));
    (status, Json(body))
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Main Orchestration Endpoint
/// =============================

async fn run_orchestration(
    State(state): State<ApiState>,
    Json(req): Json<OrchestrateRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!("Received orchestration request: {}", req.query);

    let user = user_from_request(&req);
    match state.orchestrator.orchestrate(&req.query, &user).await {
        Ok(outcome) => (StatusCode::OK, Json(ApiResponse::success(outcome))),
        Err(error) => failure_response(&error),
    }
}

/// =============================
/// Decision Trace Endpoints
/// =============================

async fn get_trace(
    State(state): State<ApiState>,
    Path(trace_id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.trace.get_trace(trace_id).await {
        Ok(trace) => (StatusCode::OK, Json(ApiResponse::success(trace))),
        Err(error) => failure_response(&error),
    }
}

async fn submit_feedback(
    State(state): State<ApiState>,
    Json(req): Json<FeedbackRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.trace.record_feedback(req.trace_id, &req.feedback).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "trace_id": req.trace_id,
                "recorded": true,
            }))),
        ),
        Err(error) => failure_response(&error),
    }
}

async fn agent_metrics(State(state): State<ApiState>) -> (StatusCode, Json<ApiResponse>) {
    match state.trace.agent_metrics().await {
        Ok(metrics) => (StatusCode::OK, Json(ApiResponse::success(metrics))),
        Err(error) => failure_response(&error),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(
    orchestrator: Arc<OrchestratorAgent>,
    trace: Arc<DecisionTraceService>,
) -> Router {
    let state = ApiState {
        orchestrator,
        trace,
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/orchestrate", post(run_orchestration))
        .route("/api/agents/trace/:trace_id", get(get_trace))
        .route("/api/agents/feedback", post(submit_feedback))
        .route("/api/agents/metrics", get(agent_metrics))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<OrchestratorAgent>,
    trace: Arc<DecisionTraceService>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator, trace);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::tests::ScriptedAgent;
    use crate::agents::AgentRegistry;
    use crate::memory::MemoryService;
    use crate::models::AgentType;

    fn test_state() -> ApiState {
        let mut registry = AgentRegistry::new();
        registry
            .register(Arc::new(ScriptedAgent::new(AgentType::RiskAssessment)))
            .unwrap();
        registry
            .register(Arc::new(ScriptedAgent::new(AgentType::Simulation)))
            .unwrap();

        let trace = Arc::new(DecisionTraceService::in_memory());
        let orchestrator = Arc::new(OrchestratorAgent::new(
            Arc::new(registry),
            Arc::clone(&trace),
            Arc::new(MemoryService::in_memory()),
        ));
        ApiState {
            orchestrator,
            trace,
        }
    }

    #[test]
    fn stable_user_ids_are_deterministic() {
        let a = parse_or_stable_uuid(Some("rahul-enduser"), "anonymous-user");
        let b = parse_or_stable_uuid(Some("rahul-enduser"), "anonymous-user");
        assert_eq!(a, b);

        let parsed = parse_or_stable_uuid(Some("550e8400-e29b-41d4-a716-446655440000"), "seed");
        assert_eq!(
            parsed,
            Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap()
        );

        let blank = parse_or_stable_uuid(Some("   "), "anonymous-user");
        assert_eq!(blank, stable_uuid_from_string("anonymous-user"));
    }

    #[test]
    fn blank_user_ids_stay_anonymous() {
        let req = OrchestrateRequest {
            query: "review my spending".to_string(),
            user_id: Some("  ".to_string()),
            context: None,
        };
        assert!(user_from_request(&req).user_id.is_none());

        let named = OrchestrateRequest {
            user_id: Some("rahul-enduser".to_string()),
            ..req
        };
        assert!(user_from_request(&named).user_id.is_some());
    }

    #[tokio::test]
    async fn unknown_traces_return_not_found() {
        let state = test_state();

        let (status, Json(body)) = get_trace(State(state), Path(Uuid::new_v4())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!body.success);
        assert!(body.error.unwrap().contains("TRACE_NOT_FOUND"));
    }

    #[tokio::test]
    async fn orchestration_result_feeds_the_trace_endpoints() {
        let state = test_state();

        let request = OrchestrateRequest {
            query: "Is my money at risk right now?".to_string(),
            user_id: Some("rahul-enduser".to_string()),
            context: None,
        };
        let (status, Json(body)) = run_orchestration(State(state.clone()), Json(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.success);

        let data = body.data.unwrap();
        let trace_id = Uuid::parse_str(data["trace_id"].as_str().unwrap()).unwrap();
        assert!(data["confidence"].as_f64().unwrap() > 0.0);

        let (status, Json(trace_body)) = get_trace(State(state.clone()), Path(trace_id)).await;
        assert_eq!(status, StatusCode::OK);
        let trace = trace_body.data.unwrap();
        assert_eq!(trace["steps"].as_array().unwrap().len(), 2);

        let feedback = FeedbackRequest {
            trace_id,
            feedback: "clear and actionable".to_string(),
        };
        let (status, _) = submit_feedback(State(state.clone()), Json(feedback)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, Json(metrics_body)) = agent_metrics(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        let metrics = metrics_body.data.unwrap();
        let agents: Vec<&str> = metrics
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["agent_type"].as_str().unwrap())
            .collect();
        assert!(agents.contains(&"risk_assessment"));
    }
}
