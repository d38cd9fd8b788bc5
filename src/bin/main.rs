use invoice_workflow_engine::{
    engine::WorkflowEngine,
    extraction::{Extraction, StubExtractionService},
    models::InvoiceRecord,
    notify::LogNotifier,
    policy::create_default_policy_validator,
    session::InMemorySessionStore,
    store::{InMemoryInvoiceStore, InvoiceStore},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Invoice Reimbursement Workflow starting (scripted demo)");

    // Create components with a scripted extractor so the demo runs offline
    let extractor = Arc::new(StubExtractionService::new());
    let sessions = Arc::new(InMemorySessionStore::new());
    let invoice_store = Arc::new(InMemoryInvoiceStore::with_manager("demo-manager"));
    let notifier = Arc::new(LogNotifier);

    let engine = WorkflowEngine::new(
        extractor.clone(),
        create_default_policy_validator(),
        sessions,
        invoice_store.clone(),
        notifier,
    );

    // Turn 1: an invoice with policy problems
    extractor
        .push(Extraction::ok(vec![InvoiceRecord {
            vendor_name: "KFC".to_string(),
            invoice_date: "2023-01-01".to_string(),
            total_amount: 250.0,
            items: "team lunch meal".to_string(),
            ..InvoiceRecord::default()
        }]))
        .await;

    let state = engine
        .submit("demo-user", "Please reimburse my team lunch", vec![])
        .await?;
    println!("\n=== TURN 1: stage {} ===", state.stage);
    println!("{}\n", state.last_assistant_message().unwrap_or_default());

    // Turn 2: the corrected record
    extractor
        .push(Extraction::ok(vec![InvoiceRecord {
            tax_id: "123456789".to_string(),
            company_name: "Contoso Ltd".to_string(),
            vendor_name: "KFC".to_string(),
            invoice_date: Utc::now().date_naive().format("%Y-%m-%d").to_string(),
            total_amount: 150.0,
            items: "team lunch meal".to_string(),
            ..InvoiceRecord::default()
        }]))
        .await;

    let state = engine
        .submit(
            "demo-user",
            "Tax ID is 123456789, company Contoso Ltd, the amount was 150 and it was today",
            vec![],
        )
        .await?;
    println!("=== TURN 2: stage {} ===", state.stage);
    println!("{}\n", state.last_assistant_message().unwrap_or_default());

    // Turn 3: confirm
    let state = engine.submit("demo-user", "CONFIRM", vec![]).await?;
    println!("=== TURN 3: stage {} ===", state.stage);
    println!("{}\n", state.last_assistant_message().unwrap_or_default());

    let pending = invoice_store.list_pending("demo-manager").await?;
    println!("=== PENDING APPROVALS ({}) ===", pending.len());
    for stored in pending {
        println!(
            "  {} | {} | {:.2} {} | {}",
            stored.invoice_id,
            stored.record.vendor_name,
            stored.record.total_amount,
            stored.record.currency,
            stored.status
        );
    }

    Ok(())
}
