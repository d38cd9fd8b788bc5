//! Extraction service trait and implementations
//!
//! Extraction turns raw text/image/PDF input into structured invoice
//! records. The engine treats it as opaque: it never errors, it reports
//! failure through `success = false` so the state machine always has a
//! valid next state.

use crate::models::{Attachment, ChatMessage, InvoiceRecord};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Mutex;

pub mod gemini;
pub use gemini::GeminiExtractor;

/// Output of one extraction call
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Full merged array when no attachments were supplied, new records
    /// only when they were
    pub invoices: Vec<InvoiceRecord>,
    pub success: bool,
    pub status_message: String,
}

impl Extraction {
    pub fn ok(invoices: Vec<InvoiceRecord>) -> Self {
        Self {
            invoices,
            success: true,
            status_message: String::new(),
        }
    }

    pub fn failed(status_message: impl Into<String>) -> Self {
        Self {
            invoices: Vec::new(),
            success: false,
            status_message: status_message.into(),
        }
    }
}

/// Trait for structured invoice extraction (LLM controlled)
#[async_trait]
pub trait ExtractionService: Send + Sync {
    /// Extract invoice records from the conversation. `existing` is passed
    /// as reconciliation context; the service decides modify-vs-append and
    /// returns accordingly (see `reconcile`).
    async fn extract(
        &self,
        message_log: &[ChatMessage],
        existing: &[InvoiceRecord],
        attachments: &[Attachment],
    ) -> Extraction;
}

/// Scriptable extractor for development & testing
/// Keeps the engine functional without LLM dependency
pub struct StubExtractionService {
    outcomes: Mutex<VecDeque<Extraction>>,
}

impl StubExtractionService {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue the outcome of the next extraction call
    pub async fn push(&self, outcome: Extraction) {
        self.outcomes.lock().await.push_back(outcome);
    }
}

impl Default for StubExtractionService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExtractionService for StubExtractionService {
    async fn extract(
        &self,
        _message_log: &[ChatMessage],
        _existing: &[InvoiceRecord],
        _attachments: &[Attachment],
    ) -> Extraction {
        self.outcomes
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Extraction::failed("No scripted extraction available"))
    }
}
