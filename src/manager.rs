//! Manager approval surface
//!
//! Read/act operations over persisted invoices for the approving manager:
//! paginated pending queue, batch approve, batch reject. Batch operations
//! report per-invoice outcomes rather than failing wholesale.

use crate::models::{InvoiceStatus, StoredInvoice};
use crate::store::InvoiceStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

const MIN_PAGE_SIZE: usize = 1;
const MAX_PAGE_SIZE: usize = 100;
const DEFAULT_PAGE_SIZE: usize = 10;

/// One page of a manager's pending queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPage {
    pub total_pending: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub invoices: Vec<StoredInvoice>,
}

/// Outcome of one invoice in a batch approve/reject
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub invoice_id: String,
    pub updated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct ManagerService {
    store: Arc<dyn InvoiceStore>,
}

impl ManagerService {
    pub fn new(store: Arc<dyn InvoiceStore>) -> Self {
        Self { store }
    }

    /// Pending invoices for a manager, oldest first, paginated.
    /// Page numbers are 1-based; out-of-range pages return an empty list
    /// with the counts intact.
    pub async fn pending(
        &self,
        manager_id: &str,
        page: Option<usize>,
        page_size: Option<usize>,
    ) -> Result<PendingPage> {
        let page = page.unwrap_or(1).max(1);
        let page_size = page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE);

        let all = self.store.list_pending(manager_id).await?;
        let total_pending = all.len();
        let total_pages = total_pending.div_ceil(page_size);

        // Caller-supplied page numbers can be absurd; saturate instead of
        // overflowing so out-of-range pages come back empty.
        let invoices = all
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();

        Ok(PendingPage {
            total_pending,
            page,
            page_size,
            total_pages,
            invoices,
        })
    }

    /// Approve a batch of invoices; each id succeeds or fails independently
    pub async fn approve(&self, invoice_ids: &[String]) -> Vec<StatusUpdate> {
        self.update_batch(invoice_ids, InvoiceStatus::Approved, None)
            .await
    }

    /// Reject a batch of invoices with a shared reason
    pub async fn reject(&self, invoice_ids: &[String], reason: &str) -> Vec<StatusUpdate> {
        self.update_batch(
            invoice_ids,
            InvoiceStatus::Rejected,
            Some(reason.to_string()),
        )
        .await
    }

    async fn update_batch(
        &self,
        invoice_ids: &[String],
        status: InvoiceStatus,
        reason: Option<String>,
    ) -> Vec<StatusUpdate> {
        let mut results = Vec::with_capacity(invoice_ids.len());

        for invoice_id in invoice_ids {
            let outcome = self
                .store
                .update_status(invoice_id, status, reason.clone())
                .await;

            results.push(match outcome {
                Ok(()) => StatusUpdate {
                    invoice_id: invoice_id.clone(),
                    updated: true,
                    error: None,
                },
                Err(e) => StatusUpdate {
                    invoice_id: invoice_id.clone(),
                    updated: false,
                    error: Some(e.to_string()),
                },
            });
        }

        let updated = results.iter().filter(|r| r.updated).count();
        info!(
            status = %status,
            requested = invoice_ids.len(),
            updated = updated,
            "Batch invoice status update"
        );

        results
    }
}
