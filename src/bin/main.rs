use advisory_agent_orchestrator::{
    agents::{self, AgentServices},
    memory::MemoryService,
    models::UserContext,
    orchestrator::OrchestratorAgent,
    tools::builtin::create_default_registry,
    trace::DecisionTraceService,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Advisory Agent Orchestrator starting");

    // Create components
    let tools = Arc::new(create_default_registry()?);
    let trace = Arc::new(DecisionTraceService::in_memory());
    let services = AgentServices::new(tools, Arc::clone(&trace));
    let registry = Arc::new(agents::create_default_registry(services)?);
    let memory = Arc::new(MemoryService::in_memory());

    // Create orchestrator
    let orchestrator = OrchestratorAgent::new(registry, Arc::clone(&trace), memory);

    // Run a sample goal-planning request
    let query = "I want to save ₹50 lakhs for my child's education in 10 years";
    let user = UserContext::anonymous();

    info!(%query, "Running orchestrator");

    match orchestrator.orchestrate(query, &user).await {
        Ok(outcome) => {
            info!("Orchestration successful");
            println!("\n=== ORCHESTRATION RESULT ===");
            println!("Trace ID: {}", outcome.trace_id);
            println!("Confidence: {:.2}", outcome.confidence);
            if let Some(summary) = outcome.result["summary"].as_str() {
                println!("\n{}", summary);
            }

            let trail = trace.get_trace(outcome.trace_id).await?;
            println!("\nReasoning Trace:");
            for (i, step) in trail.steps.iter().enumerate() {
                let line = step
                    .reasoning
                    .first()
                    .map(String::as_str)
                    .unwrap_or("(no reasoning recorded)");
                println!("  {}: [{}] {}", i + 1, step.agent, line);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Orchestration failed: {}", e);
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}
