use advisory_agent_orchestrator::{
    agents::{self, AgentServices},
    api::start_server,
    llm::GeminiGenerator,
    memory::MemoryService,
    orchestrator::OrchestratorAgent,
    retrieval::HttpRetriever,
    tools::builtin::create_default_registry,
    trace::DecisionTraceService,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("🚀 Advisory Agent Orchestrator - API Server");
    info!("📍 Port: {}", api_port);

    // Create components
    let tools = Arc::new(create_default_registry()?);
    let trace = Arc::new(DecisionTraceService::from_env());
    let services = AgentServices::new(tools, Arc::clone(&trace));
    let registry = Arc::new(agents::create_default_registry(services)?);
    let memory = Arc::new(MemoryService::in_memory());

    // Create orchestrator
    let mut orchestrator = OrchestratorAgent::new(registry, Arc::clone(&trace), memory);

    match HttpRetriever::from_env() {
        Some(retriever) => {
            info!("📚 Context retrieval enabled");
            orchestrator = orchestrator.with_retriever(Arc::new(retriever));
        }
        None => info!("📚 Context retrieval disabled (no RETRIEVAL_API_BASE_URL)"),
    }

    match GeminiGenerator::from_env() {
        Some(generator) => {
            info!("🤖 Narrative synthesis enabled");
            orchestrator = orchestrator.with_generator(Arc::new(generator));
        }
        None => {
            eprintln!("⚠️  GEMINI_API_KEY not set in .env");
            eprintln!("📌 Falling back to templated summaries");
        }
    }

    info!("✅ Orchestrator initialized");
    info!("📡 Starting API server...");

    // Start API server
    start_server(Arc::new(orchestrator), trace, api_port).await?;

    Ok(())
}
