//! Invoice reconciliation
//!
//! Merges newly extracted invoice records into the in-progress list.
//! The modify-vs-append judgment is delegated to the extraction service,
//! which sees the existing records and returns the full merged array; this
//! module enforces the one invariant the engine never delegates: accepted
//! invoices are never silently dropped.

use crate::models::InvoiceRecord;
use tracing::warn;

/// Result of one reconciliation pass
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub invoices: Vec<InvoiceRecord>,
    /// Set when the extractor returned a shrinking array and the merge
    /// fell back to append-only
    pub anomaly: bool,
}

/// Merge `new_extraction` into `existing`.
///
/// - With attachments, the extraction is always additional invoices and is
///   appended as-is.
/// - Without attachments, the extractor returns the full merged array: the
///   same length as `existing` means in-place field edits, a longer array
///   means appended submissions. Either is accepted verbatim.
/// - A shorter array is an anomaly: it is logged and the new records are
///   appended instead, so prior invoices survive.
pub fn reconcile(
    existing: &[InvoiceRecord],
    latest_user_message: &str,
    new_extraction: Vec<InvoiceRecord>,
    had_attachments: bool,
) -> ReconcileOutcome {
    if had_attachments {
        let mut invoices = existing.to_vec();
        invoices.extend(new_extraction);
        return ReconcileOutcome {
            invoices,
            anomaly: false,
        };
    }

    if new_extraction.len() >= existing.len() {
        return ReconcileOutcome {
            invoices: new_extraction,
            anomaly: false,
        };
    }

    warn!(
        existing_count = existing.len(),
        extracted_count = new_extraction.len(),
        message = %latest_user_message,
        "Reconciliation anomaly: merged result shrank, falling back to append"
    );

    let mut invoices = existing.to_vec();
    invoices.extend(new_extraction);
    ReconcileOutcome {
        invoices,
        anomaly: true,
    }
}
