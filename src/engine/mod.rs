//! Workflow engine - the reimbursement state machine
//!
//! starting → analysis → verification → {awaiting_fixes ⇄ analysis}
//!                                    | → awaiting_confirmation → {notified | cancelled}
//!
//! Suspension is a plain function return: the engine is re-entered by the
//! next `submit` call carrying the user's reply, with the state held in the
//! session store between turns. No thread or task parks between turns.

use crate::error::WorkflowError;
use crate::extraction::ExtractionService;
use crate::models::{
    Attachment, InvoiceRecord, NotificationEvent, ReimbursementForm, SubmissionMeta,
    WorkflowStage, WorkflowState,
};
use crate::notify::Notifier;
use crate::policy::PolicyValidator;
use crate::reconcile;
use crate::session::{SessionHandle, SessionStore};
use crate::store::InvoiceStore;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

const AFFIRMATIVE_TOKENS: &[&str] = &["CONFIRM", "YES", "APPROVE", "OK"];
const NEGATIVE_TOKENS: &[&str] = &["CANCEL", "NO", "REJECT"];

/// Drives reimbursement sessions to completion or suspension
pub struct WorkflowEngine {
    extractor: Arc<dyn ExtractionService>,
    validator: PolicyValidator,
    sessions: Arc<dyn SessionStore>,
    invoice_store: Arc<dyn InvoiceStore>,
    notifier: Arc<dyn Notifier>,
}

impl WorkflowEngine {
    pub fn new(
        extractor: Arc<dyn ExtractionService>,
        validator: PolicyValidator,
        sessions: Arc<dyn SessionStore>,
        invoice_store: Arc<dyn InvoiceStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            extractor,
            validator,
            sessions,
            invoice_store,
            notifier,
        }
    }

    /// Start or resume a session for this user. The returned state always
    /// carries a renderable assistant message at the tail of its log.
    pub async fn submit(
        &self,
        user_id: &str,
        message: &str,
        attachments: Vec<Attachment>,
    ) -> Result<WorkflowState> {
        match self.sessions.get(user_id).await {
            Some(handle) => self.resume(user_id, handle, message, attachments).await,
            None => self.start(user_id, message, attachments).await,
        }
    }

    /// Current state of the user's session, if one is active
    pub async fn status(&self, user_id: &str) -> Option<WorkflowState> {
        let handle = self.sessions.get(user_id).await?;
        let state = handle.lock().await;
        Some(state.clone())
    }

    /// Drop the user's session outright; returns whether one existed
    pub async fn cancel(&self, user_id: &str) -> bool {
        let removed = self.sessions.remove(user_id).await;
        if removed {
            info!(user_id = %user_id, "Workflow cancelled and session evicted");
        }
        removed
    }

    async fn start(
        &self,
        user_id: &str,
        message: &str,
        attachments: Vec<Attachment>,
    ) -> Result<WorkflowState> {
        info!(user_id = %user_id, "Starting reimbursement session");

        let state = WorkflowState::new(user_id, message, attachments.clone());
        let (handle, created) = self.sessions.create(user_id, state).await;
        if !created {
            // A concurrent submit created the session first; this call
            // resumes against it instead of replacing it.
            return self.resume(user_id, handle, message, attachments).await;
        }

        let mut state = handle
            .try_lock()
            .map_err(|_| WorkflowError::SessionBusy(user_id.to_string()))?;

        state.stage = WorkflowStage::Analysis;
        self.run_pipeline(&mut state).await;

        let snapshot = state.clone();
        drop(state);

        self.evict_if_terminal(user_id, &snapshot).await;
        Ok(snapshot)
    }

    async fn resume(
        &self,
        user_id: &str,
        handle: SessionHandle,
        message: &str,
        attachments: Vec<Attachment>,
    ) -> Result<WorkflowState> {
        let mut state = handle
            .try_lock()
            .map_err(|_| WorkflowError::SessionBusy(user_id.to_string()))?;

        debug!(
            user_id = %user_id,
            stage = %state.stage,
            "Resuming suspended session"
        );

        match state.stage {
            // The fix loop: any message is correction input, unconditionally
            // routed back through analysis. A session still at `starting`
            // lost its first pipeline pass to a concurrent submit and is
            // folded in the same way.
            WorkflowStage::Starting | WorkflowStage::AwaitingFixes => {
                state.push_user(message);
                state.pending_attachments.extend(attachments);
                state.stage = WorkflowStage::Analysis;
                self.run_pipeline(&mut state).await;
            }

            // Confirmation-stage input is restricted to yes/no semantics; it
            // is never reinterpreted as new invoice data.
            WorkflowStage::AwaitingConfirmation => {
                state.push_user(message);
                self.handle_confirmation(&mut state, message).await?;
            }

            other => {
                warn!(
                    user_id = %user_id,
                    stage = %other,
                    "Message arrived for a session not at a suspend point"
                );
                state.push_assistant(
                    "Your request is still being processed. Please wait a moment and try again.",
                );
            }
        }

        let snapshot = state.clone();
        drop(state);

        self.evict_if_terminal(user_id, &snapshot).await;
        Ok(snapshot)
    }

    /// analysis → verification → suspend. Extraction failures are absorbed
    /// into a synthetic parse-failure record so this always produces a
    /// valid next state.
    async fn run_pipeline(&self, state: &mut WorkflowState) {
        // === ANALYSIS ===
        let attachments = std::mem::take(&mut state.pending_attachments);
        let had_attachments = !attachments.is_empty();

        let extraction = self
            .extractor
            .extract(&state.message_log, &state.invoices, &attachments)
            .await;

        if extraction.success && !(extraction.invoices.is_empty() && state.invoices.is_empty()) {
            let latest = state.latest_user_message().unwrap_or_default().to_string();
            let outcome = reconcile::reconcile(
                &state.invoices,
                &latest,
                extraction.invoices,
                had_attachments,
            );
            if outcome.anomaly {
                info!(
                    session_id = %state.session_id,
                    "Reconciliation fell back to append-only merge"
                );
            }
            state.invoices = outcome.invoices;
        } else {
            let reason = if extraction.success {
                "No invoice data could be extracted from the input".to_string()
            } else {
                extraction.status_message
            };
            warn!(
                session_id = %state.session_id,
                reason = %reason,
                "Extraction failed, absorbing as parse-failure record"
            );
            state.invoices.push(InvoiceRecord::parse_failure(reason));
        }

        // === VERIFICATION ===
        state.stage = WorkflowStage::Verification;
        state.violations = self.validator.validate(&state.invoices);

        debug!(
            session_id = %state.session_id,
            invoice_count = state.invoices.len(),
            violation_count = state.violations.len(),
            "Verification completed"
        );

        if state.violations.is_empty() {
            state.stage = WorkflowStage::AwaitingConfirmation;
            let summary = confirmation_summary(state);
            state.push_assistant(summary);
        } else {
            state.stage = WorkflowStage::AwaitingFixes;
            let message = violation_message(&state.violations);
            state.push_assistant(message);
        }
    }

    /// Resolve a reply at the confirmation suspend point
    async fn handle_confirmation(&self, state: &mut WorkflowState, message: &str) -> Result<()> {
        let token = message.trim().to_uppercase();

        if AFFIRMATIVE_TOKENS.contains(&token.as_str()) {
            return self.finalize(state).await;
        }

        if NEGATIVE_TOKENS.contains(&token.as_str()) {
            state.invoices.clear();
            state.violations.clear();
            state.confirmed = Some(false);
            state.stage = WorkflowStage::Cancelled;
            state.push_assistant("Reimbursement request cancelled.");
            info!(session_id = %state.session_id, "Session cancelled by user");
            return Ok(());
        }

        // Neither yes nor no: re-prompt, no state change
        state.push_assistant(
            "Please reply CONFIRM to submit for manager approval, or CANCEL to cancel the request.",
        );
        Ok(())
    }

    /// Persist and notify. A store failure aborts the transition with the
    /// stage left at awaiting_confirmation so the confirm can be retried;
    /// a notifier failure does not, because persistence already happened.
    async fn finalize(&self, state: &mut WorkflowState) -> Result<()> {
        let mut saved = 0usize;
        for (position, invoice) in state.invoices.iter().enumerate() {
            if invoice.is_parse_failure() {
                continue;
            }
            // The session position identifies the record, so a retried
            // confirm re-saves the same rows while two identical receipts
            // stay distinct.
            let meta = SubmissionMeta {
                user_id: state.user_id.clone(),
                session_id: state.session_id,
                invoice_index: position,
            };
            self.invoice_store
                .save(invoice, &meta)
                .await
                .map_err(|e| WorkflowError::PersistenceFailure(e.to_string()))?;
            saved += 1;
        }

        let form = ReimbursementForm::generate(state);
        let summary = format!(
            "Reimbursement request {} submitted: {} invoice(s), total {:.2}",
            form.form_id, form.invoice_count, form.total_amount
        );

        let event = NotificationEvent {
            user_id: state.user_id.clone(),
            stage: WorkflowStage::Notified,
            summary: summary.clone(),
        };
        if let Err(e) = self.notifier.notify(&event).await {
            warn!(
                session_id = %state.session_id,
                error = %e,
                "Notification delivery failed (state not rolled back)"
            );
        }

        state.confirmed = Some(true);
        state.notification_sent = true;
        state.stage = WorkflowStage::Notified;
        state.push_assistant(format!(
            "{}. Form ID {} has been sent to your manager for approval.",
            summary, form.form_id
        ));

        info!(
            session_id = %state.session_id,
            saved_invoices = saved,
            "Reimbursement submitted for approval"
        );

        Ok(())
    }

    async fn evict_if_terminal(&self, user_id: &str, state: &WorkflowState) {
        if state.stage.is_terminal() {
            self.sessions.remove(user_id).await;
            debug!(
                user_id = %user_id,
                stage = %state.stage,
                "Terminal session evicted"
            );
        }
    }
}

fn violation_message(violations: &[String]) -> String {
    let mut out = String::from("Policy violations found:\n");
    for (i, violation) in violations.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, violation));
    }
    out.push_str("\nPlease fix these issues and resubmit the invoice.");
    out
}

fn confirmation_summary(state: &WorkflowState) -> String {
    let count = state
        .invoices
        .iter()
        .filter(|inv| !inv.is_parse_failure())
        .count();
    format!(
        "Policy verification passed. {} invoice(s) for a total of {:.2}.\n\
         Reply CONFIRM to submit for manager approval, or CANCEL to cancel the request.",
        count,
        state.total_amount()
    )
}

//
// ================= Tests =================
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{Extraction, StubExtractionService};
    use crate::models::{InvoiceStatus, StoredInvoice};
    use crate::notify::RecordingNotifier;
    use crate::policy::create_default_policy_validator;
    use crate::session::InMemorySessionStore;
    use crate::store::{InMemoryInvoiceStore, InvoiceStore};
    use chrono::Utc;

    struct Harness {
        engine: WorkflowEngine,
        extractor: Arc<StubExtractionService>,
        sessions: Arc<InMemorySessionStore>,
        store: Arc<InMemoryInvoiceStore>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness() -> Harness {
        harness_with_store(Arc::new(InMemoryInvoiceStore::with_manager("manager-1")))
    }

    fn harness_with_store(store: Arc<InMemoryInvoiceStore>) -> Harness {
        let extractor = Arc::new(StubExtractionService::new());
        let sessions = Arc::new(InMemorySessionStore::new());
        let notifier = Arc::new(RecordingNotifier::new());

        let engine = WorkflowEngine::new(
            extractor.clone(),
            create_default_policy_validator(),
            sessions.clone(),
            store.clone(),
            notifier.clone(),
        );

        Harness {
            engine,
            extractor,
            sessions,
            store,
            notifier,
        }
    }

    fn today_str() -> String {
        Utc::now().date_naive().format("%Y-%m-%d").to_string()
    }

    fn violating_invoice() -> InvoiceRecord {
        InvoiceRecord {
            vendor_name: "KFC".to_string(),
            total_amount: 250.0,
            invoice_date: "2023-01-01".to_string(),
            items: "meal".to_string(),
            ..InvoiceRecord::default()
        }
    }

    fn clean_invoice() -> InvoiceRecord {
        InvoiceRecord {
            tax_id: "123456789".to_string(),
            company_name: "Microsoft Corp".to_string(),
            vendor_name: "KFC".to_string(),
            invoice_date: today_str(),
            total_amount: 150.0,
            items: "meal".to_string(),
            ..InvoiceRecord::default()
        }
    }

    fn attachment() -> Attachment {
        Attachment {
            filename: Some("invoice.jpg".to_string()),
            mime_type: "image/jpeg".to_string(),
            data: vec![0xff, 0xd8, 0xff],
        }
    }

    /// Drive a fresh session to the confirmation suspend point
    async fn reach_confirmation(h: &Harness) -> WorkflowState {
        h.extractor
            .push(Extraction::ok(vec![clean_invoice()]))
            .await;
        let state = h
            .engine
            .submit("alice", "submit my lunch invoice", vec![])
            .await
            .unwrap();
        assert_eq!(state.stage, WorkflowStage::AwaitingConfirmation);
        state
    }

    #[tokio::test]
    async fn test_scenario_a_violations_suspend_in_fix_loop() {
        let h = harness();
        h.extractor
            .push(Extraction::ok(vec![violating_invoice()]))
            .await;

        let state = h
            .engine
            .submit("alice", "submit my lunch invoice", vec![])
            .await
            .unwrap();

        assert_eq!(state.stage, WorkflowStage::AwaitingFixes);
        assert!(state
            .violations
            .iter()
            .any(|v| v.contains("Missing required field: tax_id")));
        assert!(state
            .violations
            .iter()
            .any(|v| v.contains("Missing required field: company_name")));
        assert!(state.violations.iter().any(|v| v.contains("Meal expense")));
        assert!(state
            .violations
            .iter()
            .any(|v| v.contains("exceeds 30-day policy")));

        // The suspend point rendered the violations to the user
        let reply = state.last_assistant_message().unwrap();
        assert!(reply.contains("Policy violations found"));
    }

    #[tokio::test]
    async fn test_scenario_b_correction_clears_violations() {
        let h = harness();
        h.extractor
            .push(Extraction::ok(vec![violating_invoice()]))
            .await;
        h.engine
            .submit("alice", "submit my lunch invoice", vec![])
            .await
            .unwrap();

        // The corrected full merged array (same length: field edits)
        h.extractor
            .push(Extraction::ok(vec![clean_invoice()]))
            .await;
        let state = h
            .engine
            .submit(
                "alice",
                "update: Tax ID 123456789, Company Name Microsoft Corp, Amount 150, Date today",
                vec![],
            )
            .await
            .unwrap();

        assert_eq!(state.stage, WorkflowStage::AwaitingConfirmation);
        assert!(state.violations.is_empty());
        assert_eq!(state.invoices.len(), 1);
        assert_eq!(state.invoices[0].tax_id, "123456789");
    }

    #[tokio::test]
    async fn test_scenario_c_confirm_persists_and_notifies() {
        let h = harness();
        reach_confirmation(&h).await;

        let state = h.engine.submit("alice", "CONFIRM", vec![]).await.unwrap();

        assert_eq!(state.stage, WorkflowStage::Notified);
        assert!(state.notification_sent);
        assert_eq!(state.confirmed, Some(true));

        let pending = h.store.list_pending("manager-1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].user_id, "alice");
        assert_eq!(pending[0].status, InvoiceStatus::Pending);

        let events = h.notifier.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, WorkflowStage::Notified);

        // Terminal session is evicted
        assert!(h.engine.status("alice").await.is_none());
    }

    #[tokio::test]
    async fn test_scenario_d_cancel_clears_invoices() {
        let h = harness();
        reach_confirmation(&h).await;

        let state = h.engine.submit("alice", "cancel", vec![]).await.unwrap();

        assert_eq!(state.stage, WorkflowStage::Cancelled);
        assert!(state.invoices.is_empty());
        assert!(state.violations.is_empty());
        assert_eq!(state.confirmed, Some(false));
        assert!(h.engine.status("alice").await.is_none());

        // Nothing was persisted or notified
        assert!(h.store.list_pending("manager-1").await.unwrap().is_empty());
        assert!(h.notifier.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_scenario_e_two_attachments_append_two_records() {
        let h = harness();

        let mut second = clean_invoice();
        second.vendor_name = "Office Depot".to_string();
        second.items = "printer paper".to_string();
        second.total_amount = 80.0;

        h.extractor
            .push(Extraction::ok(vec![clean_invoice(), second]))
            .await;

        let state = h
            .engine
            .submit(
                "alice",
                "here are two invoices",
                vec![attachment(), attachment()],
            )
            .await
            .unwrap();

        assert_eq!(state.invoices.len(), 2);
        assert_eq!(state.stage, WorkflowStage::AwaitingConfirmation);
        // Attachments are consumed by the extraction call
        assert!(state.pending_attachments.is_empty());
    }

    #[tokio::test]
    async fn test_confirmation_reprompts_on_unrecognized_input() {
        let h = harness();
        let before = reach_confirmation(&h).await;

        // No scripted extraction queued: if the engine wrongly routed this
        // through analysis it would produce a parse-failure record.
        let state = h
            .engine
            .submit("alice", "what happens next?", vec![])
            .await
            .unwrap();

        assert_eq!(state.stage, WorkflowStage::AwaitingConfirmation);
        assert_eq!(state.invoices, before.invoices);
        assert!(state
            .last_assistant_message()
            .unwrap()
            .contains("Reply CONFIRM"));
    }

    #[tokio::test]
    async fn test_extraction_failure_becomes_violation() {
        let h = harness();
        h.extractor
            .push(Extraction::failed("model returned no JSON"))
            .await;

        let state = h
            .engine
            .submit("alice", "submit my invoice", vec![])
            .await
            .unwrap();

        assert_eq!(state.stage, WorkflowStage::AwaitingFixes);
        assert!(state
            .violations
            .iter()
            .any(|v| v.contains("Failed to parse invoice data")));
    }

    #[tokio::test]
    async fn test_empty_successful_extraction_is_treated_as_failure() {
        let h = harness();
        h.extractor.push(Extraction::ok(vec![])).await;

        let state = h.engine.submit("alice", "hello", vec![]).await.unwrap();

        assert_eq!(state.stage, WorkflowStage::AwaitingFixes);
        assert_eq!(state.invoices.len(), 1);
        assert!(state.invoices[0].is_parse_failure());
    }

    #[tokio::test]
    async fn test_shrinking_extraction_never_loses_invoices() {
        let h = harness();

        let mut first = violating_invoice();
        first.vendor_name = "Staples".to_string();
        first.items = "paper".to_string();
        h.extractor
            .push(Extraction::ok(vec![first, violating_invoice()]))
            .await;
        let state = h
            .engine
            .submit("alice", "two invoices", vec![])
            .await
            .unwrap();
        assert_eq!(state.invoices.len(), 2);

        // A correction that wrongly drops a record falls back to append
        h.extractor
            .push(Extraction::ok(vec![clean_invoice()]))
            .await;
        let state = h
            .engine
            .submit("alice", "fix the tax id", vec![])
            .await
            .unwrap();
        assert_eq!(state.invoices.len(), 3);
    }

    #[tokio::test]
    async fn test_fix_loop_message_with_attachment_appends() {
        let h = harness();
        h.extractor
            .push(Extraction::ok(vec![violating_invoice()]))
            .await;
        h.engine.submit("alice", "my invoice", vec![]).await.unwrap();

        // New attachment arriving in the fix loop is additional data
        h.extractor
            .push(Extraction::ok(vec![clean_invoice()]))
            .await;
        let state = h
            .engine
            .submit("alice", "another one", vec![attachment()])
            .await
            .unwrap();

        assert_eq!(state.invoices.len(), 2);
        assert_eq!(state.stage, WorkflowStage::AwaitingFixes);
    }

    #[tokio::test]
    async fn test_concurrent_submit_rejected_as_busy() {
        let h = harness();
        reach_confirmation(&h).await;

        let handle = h.sessions.get("alice").await.unwrap();
        let _guard = handle.lock().await;

        let result = h.engine.submit("alice", "CONFIRM", vec![]).await;
        assert!(matches!(result, Err(WorkflowError::SessionBusy(_))));
    }

    #[tokio::test]
    async fn test_status_and_cancel_surface() {
        let h = harness();
        assert!(h.engine.status("alice").await.is_none());
        assert!(!h.engine.cancel("alice").await);

        h.extractor
            .push(Extraction::ok(vec![violating_invoice()]))
            .await;
        h.engine.submit("alice", "my invoice", vec![]).await.unwrap();

        let status = h.engine.status("alice").await.unwrap();
        assert_eq!(status.stage, WorkflowStage::AwaitingFixes);

        assert!(h.engine.cancel("alice").await);
        assert!(h.engine.status("alice").await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_first_submits_share_one_session() {
        for round in 0..100 {
            let extractor = Arc::new(StubExtractionService::new());
            extractor.push(Extraction::ok(vec![clean_invoice()])).await;
            extractor.push(Extraction::ok(vec![clean_invoice()])).await;

            let engine = Arc::new(WorkflowEngine::new(
                extractor.clone(),
                create_default_policy_validator(),
                Arc::new(InMemorySessionStore::new()),
                Arc::new(InMemoryInvoiceStore::with_manager("manager-1")),
                Arc::new(RecordingNotifier::new()),
            ));

            let first = tokio::spawn({
                let engine = engine.clone();
                async move { engine.submit("alice", "first invoice", vec![]).await }
            });
            let second = tokio::spawn({
                let engine = engine.clone();
                async move { engine.submit("alice", "second invoice", vec![]).await }
            });

            let results = [first.await.unwrap(), second.await.unwrap()];

            // One submit always lands; a loser is rejected as busy, never
            // silently given its own session.
            let ok_sessions: Vec<_> = results
                .iter()
                .filter_map(|r| r.as_ref().ok().map(|s| s.session_id))
                .collect();
            assert!(
                !ok_sessions.is_empty(),
                "round {}: both concurrent submits failed",
                round
            );
            for pair in ok_sessions.windows(2) {
                assert_eq!(
                    pair[0], pair[1],
                    "round {}: concurrent first submits produced independent sessions",
                    round
                );
            }
            for result in &results {
                if let Err(e) = result {
                    assert!(matches!(e, WorkflowError::SessionBusy(_)));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_identical_invoices_persist_separately() {
        let h = harness();

        // Two byte-identical receipts submitted as two attachments
        let duplicate = clean_invoice();
        h.extractor
            .push(Extraction::ok(vec![duplicate.clone(), duplicate]))
            .await;

        let state = h
            .engine
            .submit(
                "alice",
                "two copies of the parking receipt",
                vec![attachment(), attachment()],
            )
            .await
            .unwrap();
        assert_eq!(state.stage, WorkflowStage::AwaitingConfirmation);
        assert_eq!(state.invoices.len(), 2);

        let state = h.engine.submit("alice", "CONFIRM", vec![]).await.unwrap();
        assert_eq!(state.stage, WorkflowStage::Notified);

        let pending = h.store.list_pending("manager-1").await.unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let h = harness();
        h.extractor
            .push(Extraction::ok(vec![violating_invoice()]))
            .await;
        h.extractor
            .push(Extraction::ok(vec![clean_invoice()]))
            .await;

        let alice = h.engine.submit("alice", "my invoice", vec![]).await.unwrap();
        let bob = h.engine.submit("bob", "my invoice", vec![]).await.unwrap();

        assert_eq!(alice.stage, WorkflowStage::AwaitingFixes);
        assert_eq!(bob.stage, WorkflowStage::AwaitingConfirmation);
    }

    /// Store whose first save fails, then delegates to an inner store
    struct FlakyStore {
        inner: InMemoryInvoiceStore,
        failed_once: tokio::sync::Mutex<bool>,
    }

    #[async_trait::async_trait]
    impl InvoiceStore for FlakyStore {
        async fn save(&self, invoice: &InvoiceRecord, meta: &SubmissionMeta) -> crate::Result<String> {
            let mut failed = self.failed_once.lock().await;
            if !*failed {
                *failed = true;
                return Err(WorkflowError::DatabaseError("connection reset".to_string()));
            }
            self.inner.save(invoice, meta).await
        }

        async fn get(&self, invoice_id: &str) -> crate::Result<Option<StoredInvoice>> {
            self.inner.get(invoice_id).await
        }

        async fn list_pending(&self, manager_id: &str) -> crate::Result<Vec<StoredInvoice>> {
            self.inner.list_pending(manager_id).await
        }

        async fn update_status(
            &self,
            invoice_id: &str,
            status: InvoiceStatus,
            reason: Option<String>,
        ) -> crate::Result<()> {
            self.inner.update_status(invoice_id, status, reason).await
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_confirmation_retryable() {
        let extractor = Arc::new(StubExtractionService::new());
        let sessions = Arc::new(InMemorySessionStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let store = Arc::new(FlakyStore {
            inner: InMemoryInvoiceStore::with_manager("manager-1"),
            failed_once: tokio::sync::Mutex::new(false),
        });

        let engine = WorkflowEngine::new(
            extractor.clone(),
            create_default_policy_validator(),
            sessions.clone(),
            store.clone(),
            notifier.clone(),
        );

        extractor.push(Extraction::ok(vec![clean_invoice()])).await;
        let state = engine.submit("alice", "my invoice", vec![]).await.unwrap();
        assert_eq!(state.stage, WorkflowStage::AwaitingConfirmation);

        // First confirm hits the store failure and is surfaced as an error
        let result = engine.submit("alice", "CONFIRM", vec![]).await;
        assert!(matches!(result, Err(WorkflowError::PersistenceFailure(_))));

        // The session survives in awaiting_confirmation
        let status = engine.status("alice").await.unwrap();
        assert_eq!(status.stage, WorkflowStage::AwaitingConfirmation);
        assert!(!status.notification_sent);
        assert!(notifier.events().await.is_empty());

        // Retrying the confirm succeeds
        let state = engine.submit("alice", "CONFIRM", vec![]).await.unwrap();
        assert_eq!(state.stage, WorkflowStage::Notified);
        assert_eq!(store.list_pending("manager-1").await.unwrap().len(), 1);
    }
}
