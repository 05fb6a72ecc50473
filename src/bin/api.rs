use grounded_banking_agent::{
    agent::Orchestrator,
    api::start_server,
    audit::AuditLog,
    config::AgentConfig,
    generator::GeminiGenerator,
    retrieval,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Missing credentials stop the process here, never mid-turn.
    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            eprintln!("See .env.example for setup instructions");
            return Err(e.into());
        }
    };

    info!("Grounded banking agent - API Server");
    info!(port = config.port, model = %config.gemini_model, "Configuration loaded");

    // Create components
    let generator = Arc::new(GeminiGenerator::new(
        config.gemini_api_key.clone(),
        config.gemini_model.clone(),
    )?);
    let retriever = retrieval::from_source(&config.retriever, config.pipeline.call_timeout)?;
    let audit_log = Arc::new(AuditLog::from_database_url(config.database_url.as_deref()));

    let orchestrator = Arc::new(Orchestrator::new(
        generator,
        retriever,
        audit_log,
        config.pipeline,
    ));

    info!("Orchestrator initialized");

    start_server(orchestrator, config.port).await?;

    Ok(())
}
