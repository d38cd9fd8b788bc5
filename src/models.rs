//! Core data models for the invoice reimbursement workflow

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

/// State-machine stage of a reimbursement session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Starting,
    Analysis,
    Verification,
    AwaitingFixes,
    AwaitingConfirmation,
    Notified,
    Cancelled,
}

impl WorkflowStage {
    /// Terminal stages are evicted from the session store
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStage::Notified | WorkflowStage::Cancelled)
    }

    /// Suspend points return control to the caller pending user input
    pub fn is_suspended(&self) -> bool {
        matches!(
            self,
            WorkflowStage::AwaitingFixes | WorkflowStage::AwaitingConfirmation
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Lifecycle status of a persisted invoice
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

//
// ================= Messages & Attachments =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Raw invoice bytes (image or PDF) awaiting extraction.
/// Consumed by a single extraction call, never retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: Option<String>,
    pub mime_type: String,
    pub data: Vec<u8>,
}

//
// ================= Invoice Record =================
//

/// One extracted/submitted invoice. `parsing_error` is mutually exclusive
/// with the business fields; an error record is inert except for reporting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceRecord {
    #[serde(default)]
    pub tax_id: String,
    #[serde(default)]
    pub company_name: String,
    #[serde(default)]
    pub vendor_name: String,
    /// YYYY-MM-DD
    #[serde(default)]
    pub invoice_date: String,
    #[serde(default)]
    pub total_amount: f64,
    #[serde(default)]
    pub items: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsing_error: Option<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl Default for InvoiceRecord {
    fn default() -> Self {
        Self {
            tax_id: String::new(),
            company_name: String::new(),
            vendor_name: String::new(),
            invoice_date: String::new(),
            total_amount: 0.0,
            items: String::new(),
            invoice_number: None,
            currency: default_currency(),
            parsing_error: None,
        }
    }
}

impl InvoiceRecord {
    /// Synthetic record absorbing an extraction failure
    pub fn parse_failure(message: impl Into<String>) -> Self {
        Self {
            parsing_error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn is_parse_failure(&self) -> bool {
        self.parsing_error.is_some()
    }
}

//
// ================= Workflow State =================
//

/// One per active reimbursement session. Transition functions read and
/// write this whole struct; access is serialized per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub session_id: Uuid,
    pub user_id: String,
    /// Append-only, never reordered; the most recent user entry drives
    /// re-extraction.
    pub message_log: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_attachments: Vec<Attachment>,
    /// Position is identity within the session; insertion order preserved.
    pub invoices: Vec<InvoiceRecord>,
    /// Always derived from the last validation pass, never hand-edited.
    pub violations: Vec<String>,
    pub confirmed: Option<bool>,
    pub stage: WorkflowStage,
    pub notification_sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(
        user_id: impl Into<String>,
        first_message: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            user_id: user_id.into(),
            message_log: vec![ChatMessage::user(first_message)],
            pending_attachments: attachments,
            invoices: Vec::new(),
            violations: Vec::new(),
            confirmed: None,
            stage: WorkflowStage::Starting,
            notification_sent: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.message_log.push(ChatMessage::user(content));
        self.updated_at = Utc::now();
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.message_log.push(ChatMessage::assistant(content));
        self.updated_at = Utc::now();
    }

    /// Latest user entry in the log
    pub fn latest_user_message(&self) -> Option<&str> {
        self.message_log
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
    }

    /// Latest assistant entry, rendered to the caller
    pub fn last_assistant_message(&self) -> Option<&str> {
        self.message_log
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
            .map(|m| m.content.as_str())
    }

    /// Sum over non-error records
    pub fn total_amount(&self) -> f64 {
        self.invoices
            .iter()
            .filter(|inv| !inv.is_parse_failure())
            .map(|inv| inv.total_amount)
            .sum()
    }
}

//
// ================= Reimbursement Form =================
//

/// Summary form generated when a session is submitted for approval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReimbursementForm {
    pub form_id: String,
    pub employee_id: String,
    pub submission_date: DateTime<Utc>,
    pub invoice_count: usize,
    pub total_amount: f64,
    pub status: String,
}

impl ReimbursementForm {
    pub fn generate(state: &WorkflowState) -> Self {
        let now = Utc::now();
        Self {
            form_id: format!("REI-{}", now.format("%Y%m%d-%H%M%S")),
            employee_id: state.user_id.clone(),
            submission_date: now,
            invoice_count: state
                .invoices
                .iter()
                .filter(|inv| !inv.is_parse_failure())
                .count(),
            total_amount: state.total_amount(),
            status: "pending_approval".to_string(),
        }
    }
}

//
// ================= Persistence =================
//

/// Persisted form of an invoice record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredInvoice {
    pub invoice_id: String,
    pub user_id: String,
    pub manager_id: Option<String>,
    /// Position of the record within its session, part of its identity
    pub invoice_index: usize,
    pub record: InvoiceRecord,
    pub status: InvoiceStatus,
    pub submitted_date: DateTime<Utc>,
    pub approved_date: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub workflow_session_id: Uuid,
}

/// Identity metadata handed to the invoice store alongside each record.
/// `(session_id, invoice_index)` identifies the record across confirm
/// retries; identical records at different positions are distinct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionMeta {
    pub user_id: String,
    pub session_id: Uuid,
    pub invoice_index: usize,
}

//
// ================= Notification =================
//

/// Plain status event handed to the notifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub user_id: String,
    pub stage: WorkflowStage,
    pub summary: String,
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStage::Starting => "starting",
            WorkflowStage::Analysis => "analysis",
            WorkflowStage::Verification => "verification",
            WorkflowStage::AwaitingFixes => "awaiting_fixes",
            WorkflowStage::AwaitingConfirmation => "awaiting_confirmation",
            WorkflowStage::Notified => "notified",
            WorkflowStage::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Approved => "approved",
            InvoiceStatus::Rejected => "rejected",
            InvoiceStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}
