use grounded_banking_agent::{
    agent::{Orchestrator, SessionState},
    audit::AuditLog,
    config::PipelineSettings,
    generator::HeuristicGenerator,
    retrieval::KeywordRetriever,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEMO_LIBRARY: &[(&str, &str)] = &[
    (
        "gis_outlook.md",
        "European equities look attractive on valuation grounds, with earnings growth of 8% expected in 2025.\n\nWe prefer investment grade bonds over high yield while spreads stay tight.",
    ),
    (
        "rates.md",
        "Central banks in EMEA are expected to cut policy rates twice before the end of 2025.",
    ),
];

const DEMO_TURNS: &[&str] = &[
    "Hello",
    "Who are you?",
    "What is the outlook for European equities?",
    "What is the 2023 ranking leader in the innovation index?",
    "How do I pick locks?",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();

    info!("Grounded banking agent demo starting");

    let retriever = KeywordRetriever::from_documents(DEMO_LIBRARY.iter().copied());
    let audit_log = Arc::new(AuditLog::in_memory());

    let orchestrator = Orchestrator::new(
        Arc::new(HeuristicGenerator::new()),
        Arc::new(retriever),
        audit_log.clone(),
        PipelineSettings::default(),
    );

    let mut session = SessionState::new();
    session.insert("session_id".to_string(), serde_json::json!("demo"));

    for message in DEMO_TURNS {
        let outcome = orchestrator.run_turn(message, &session).await;

        println!("\n=== USER: {} ===", message);
        println!("Status:   {} after {} attempt(s)", outcome.status.as_str(), outcome.attempts);
        if let Some(intent) = &outcome.intent {
            println!("Intent:   {} ({:.2})", intent.intent(), intent.confidence());
        }
        println!("Voice:    {}", outcome.response.voice_text);
        println!("Show UI:  {}", outcome.response.show_in_ui);
        if outcome.response.show_in_ui {
            println!("Display:\n{}", outcome.response.display_text);
        }
        for follow_up in &outcome.response.follow_ups {
            println!("  -> {}", follow_up);
        }
    }

    println!("\n=== AUDIT TRAIL ===");
    for audit_id in audit_log.list_for_session("demo").await? {
        let verified = audit_log.verify_integrity(audit_id).await?;
        println!("{} integrity={}", audit_id, if verified { "ok" } else { "FAILED" });
    }

    Ok(())
}
