use invoice_workflow_engine::{
    api::start_server,
    engine::WorkflowEngine,
    extraction::GeminiExtractor,
    manager::ManagerService,
    notify::LogNotifier,
    policy::create_default_policy_validator,
    session::InMemorySessionStore,
    store::{InMemoryInvoiceStore, InvoiceStore, PgInvoiceStore},
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

    let gemini_api_key = std::env::var("GEMINI_API_KEY").unwrap_or_else(|_| {
        eprintln!("⚠️  GEMINI_API_KEY not set in .env");
        eprintln!("📌 See .env.example for setup instructions");
        "mock_key".to_string()
    });

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    let manager_id =
        std::env::var("MANAGER_ID").unwrap_or_else(|_| "default-manager".to_string());

    info!("🚀 Invoice Reimbursement Workflow - API Server");
    info!("📍 Port: {}", api_port);

    // Invoice store: postgres when configured, in-memory otherwise
    let invoice_store: Arc<dyn InvoiceStore> = match std::env::var("DATABASE_URL")
        .or_else(|_| std::env::var("POSTGRES_URL"))
    {
        Ok(url) => {
            info!("💾 Using postgres invoice store");
            Arc::new(PgInvoiceStore::connect(&url, Some(manager_id.clone()))?)
        }
        Err(_) => {
            info!("💾 DATABASE_URL not set, using in-memory invoice store");
            Arc::new(InMemoryInvoiceStore::with_manager(manager_id.clone()))
        }
    };

    // Create components
    let extractor = Arc::new(GeminiExtractor::new(gemini_api_key));
    let validator = create_default_policy_validator();
    let sessions = Arc::new(InMemorySessionStore::new());
    let notifier = Arc::new(LogNotifier);

    // Create engine
    let engine = Arc::new(WorkflowEngine::new(
        extractor,
        validator,
        sessions,
        invoice_store.clone(),
        notifier,
    ));
    let manager = Arc::new(ManagerService::new(invoice_store));

    info!("✅ Workflow engine initialized (manager: {})", manager_id);
    info!("📡 Starting API server...");

    // Start API server
    start_server(engine, manager, api_port).await?;

    Ok(())
}
