//! Invoice persistence layer
//!
//! Finalized invoices are handed off here when a session reaches the
//! notified stage. Saving is idempotent on `(session, invoice position)`:
//! a retried confirm returns the already-stored ids, while identical
//! records at different positions persist separately.

use crate::error::WorkflowError;
use crate::models::{InvoiceRecord, InvoiceStatus, StoredInvoice, SubmissionMeta};
use crate::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub mod postgres;
pub use postgres::PgInvoiceStore;

/// Trait for durable invoice storage
#[async_trait::async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Persist one record; returns the invoice id
    async fn save(&self, invoice: &InvoiceRecord, meta: &SubmissionMeta) -> Result<String>;
    async fn get(&self, invoice_id: &str) -> Result<Option<StoredInvoice>>;
    /// Pending invoices assigned to a manager, oldest first
    async fn list_pending(&self, manager_id: &str) -> Result<Vec<StoredInvoice>>;
    /// Approve/reject/cancel a stored invoice. Approval stamps the
    /// approval date; rejection records the reason.
    async fn update_status(
        &self,
        invoice_id: &str,
        status: InvoiceStatus,
        reason: Option<String>,
    ) -> Result<()>;
}

/// In-memory invoice store for development (non-durable)
pub struct InMemoryInvoiceStore {
    invoices: Arc<RwLock<HashMap<String, StoredInvoice>>>,
    default_manager: Option<String>,
}

impl InMemoryInvoiceStore {
    pub fn new() -> Self {
        Self {
            invoices: Arc::new(RwLock::new(HashMap::new())),
            default_manager: None,
        }
    }

    /// Assign every saved invoice to a default approving manager
    pub fn with_manager(manager_id: impl Into<String>) -> Self {
        Self {
            invoices: Arc::new(RwLock::new(HashMap::new())),
            default_manager: Some(manager_id.into()),
        }
    }
}

impl Default for InMemoryInvoiceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl InvoiceStore for InMemoryInvoiceStore {
    async fn save(&self, invoice: &InvoiceRecord, meta: &SubmissionMeta) -> Result<String> {
        let mut invoices = self.invoices.write().await;

        // Idempotent re-save for the same session position
        if let Some(existing) = invoices.values().find(|s| {
            s.workflow_session_id == meta.session_id && s.invoice_index == meta.invoice_index
        }) {
            return Ok(existing.invoice_id.clone());
        }

        let invoice_id = Uuid::new_v4().to_string();
        invoices.insert(
            invoice_id.clone(),
            StoredInvoice {
                invoice_id: invoice_id.clone(),
                user_id: meta.user_id.clone(),
                manager_id: self.default_manager.clone(),
                invoice_index: meta.invoice_index,
                record: invoice.clone(),
                status: InvoiceStatus::Pending,
                submitted_date: Utc::now(),
                approved_date: None,
                rejection_reason: None,
                workflow_session_id: meta.session_id,
            },
        );

        Ok(invoice_id)
    }

    async fn get(&self, invoice_id: &str) -> Result<Option<StoredInvoice>> {
        let invoices = self.invoices.read().await;
        Ok(invoices.get(invoice_id).cloned())
    }

    async fn list_pending(&self, manager_id: &str) -> Result<Vec<StoredInvoice>> {
        let invoices = self.invoices.read().await;

        let mut pending: Vec<StoredInvoice> = invoices
            .values()
            .filter(|s| {
                s.status == InvoiceStatus::Pending
                    && s.manager_id.as_deref() == Some(manager_id)
            })
            .cloned()
            .collect();

        pending.sort_by_key(|s| s.submitted_date);
        Ok(pending)
    }

    async fn update_status(
        &self,
        invoice_id: &str,
        status: InvoiceStatus,
        reason: Option<String>,
    ) -> Result<()> {
        let mut invoices = self.invoices.write().await;

        let stored = invoices.get_mut(invoice_id).ok_or_else(|| {
            WorkflowError::StoreError(format!("Invoice not found: {}", invoice_id))
        })?;

        stored.status = status;
        match status {
            InvoiceStatus::Approved => stored.approved_date = Some(Utc::now()),
            InvoiceStatus::Rejected => stored.rejection_reason = reason,
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(vendor: &str, amount: f64) -> InvoiceRecord {
        InvoiceRecord {
            tax_id: "111".to_string(),
            company_name: "Acme".to_string(),
            vendor_name: vendor.to_string(),
            invoice_date: "2025-08-01".to_string(),
            total_amount: amount,
            items: "supplies".to_string(),
            ..InvoiceRecord::default()
        }
    }

    fn meta() -> SubmissionMeta {
        meta_at(0)
    }

    fn meta_at(invoice_index: usize) -> SubmissionMeta {
        SubmissionMeta {
            user_id: "alice".to_string(),
            session_id: Uuid::new_v4(),
            invoice_index,
        }
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let store = InMemoryInvoiceStore::new();
        let id = store.save(&record("KFC", 42.0), &meta()).await.unwrap();

        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.record.vendor_name, "KFC");
        assert_eq!(stored.status, InvoiceStatus::Pending);
        assert!(stored.approved_date.is_none());
    }

    #[tokio::test]
    async fn test_save_is_idempotent_per_session_position() {
        let store = InMemoryInvoiceStore::new();
        let meta = meta();
        let invoice = record("KFC", 42.0);

        let first = store.save(&invoice, &meta).await.unwrap();
        let second = store.save(&invoice, &meta).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_identical_records_at_distinct_positions_both_persist() {
        let store = InMemoryInvoiceStore::new();
        let session_id = Uuid::new_v4();
        let invoice = record("City Parking", 12.0);

        // Two byte-identical receipts in one session, e.g. two equal
        // parking stubs submitted as separate attachments
        let mut first_meta = meta_at(0);
        first_meta.session_id = session_id;
        let mut second_meta = meta_at(1);
        second_meta.session_id = session_id;

        let first = store.save(&invoice, &first_meta).await.unwrap();
        let second = store.save(&invoice, &second_meta).await.unwrap();
        assert_ne!(first, second);

        assert!(store.get(&first).await.unwrap().is_some());
        assert!(store.get(&second).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_pending_by_manager() {
        let store = InMemoryInvoiceStore::with_manager("manager-1");
        store.save(&record("KFC", 42.0), &meta()).await.unwrap();
        let id = store.save(&record("Staples", 10.0), &meta()).await.unwrap();

        assert_eq!(store.list_pending("manager-1").await.unwrap().len(), 2);
        assert!(store.list_pending("someone-else").await.unwrap().is_empty());

        store
            .update_status(&id, InvoiceStatus::Approved, None)
            .await
            .unwrap();
        assert_eq!(store.list_pending("manager-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejection_records_reason() {
        let store = InMemoryInvoiceStore::new();
        let id = store.save(&record("KFC", 420.0), &meta()).await.unwrap();

        store
            .update_status(&id, InvoiceStatus::Rejected, Some("over budget".to_string()))
            .await
            .unwrap();

        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Rejected);
        assert_eq!(stored.rejection_reason.as_deref(), Some("over budget"));
    }

    #[tokio::test]
    async fn test_update_unknown_invoice_errors() {
        let store = InMemoryInvoiceStore::new();
        let result = store
            .update_status("missing", InvoiceStatus::Approved, None)
            .await;
        assert!(result.is_err());
    }
}
