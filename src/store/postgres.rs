//! Postgres-backed invoice store
//!
//! Durable backend for multi-process deployments. The schema is created
//! lazily on first use so the binary can start before the database is
//! reachable.

use crate::error::WorkflowError;
use crate::models::{InvoiceRecord, InvoiceStatus, StoredInvoice, SubmissionMeta};
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;

use super::InvoiceStore;

pub struct PgInvoiceStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
    default_manager: Option<String>,
}

impl PgInvoiceStore {
    /// Connect lazily; the pool establishes connections on first query
    pub fn connect(database_url: &str, default_manager: Option<String>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| {
                WorkflowError::DatabaseError(format!("Failed to configure postgres pool: {}", e))
            })?;

        Ok(Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
            default_manager,
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS invoices (
                      invoice_id UUID PRIMARY KEY,
                      user_id TEXT NOT NULL,
                      manager_id TEXT,
                      invoice_index BIGINT NOT NULL DEFAULT 0,
                      record TEXT NOT NULL,
                      status TEXT NOT NULL,
                      submitted_date TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      approved_date TIMESTAMPTZ,
                      rejection_reason TEXT,
                      workflow_session_id UUID NOT NULL
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_invoices_manager_status
                    ON invoices (manager_id, status, submitted_date);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                WorkflowError::DatabaseError(format!(
                    "Failed to initialize invoice schema: {}",
                    e
                ))
            })?;

        Ok(())
    }

    fn status_to_db(status: InvoiceStatus) -> &'static str {
        match status {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Approved => "approved",
            InvoiceStatus::Rejected => "rejected",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    fn status_from_db(status: &str) -> InvoiceStatus {
        match status.to_lowercase().as_str() {
            "approved" => InvoiceStatus::Approved,
            "rejected" => InvoiceStatus::Rejected,
            "cancelled" => InvoiceStatus::Cancelled,
            _ => InvoiceStatus::Pending,
        }
    }

    fn row_to_stored(row: &sqlx::postgres::PgRow) -> Result<StoredInvoice> {
        let record_json: String = row.try_get("record").map_err(|e| {
            WorkflowError::DatabaseError(format!("Failed to read invoice record: {}", e))
        })?;
        let record: InvoiceRecord = serde_json::from_str(&record_json)?;

        let invoice_id: Uuid = row.try_get("invoice_id").map_err(|e| {
            WorkflowError::DatabaseError(format!("Failed to read invoice id: {}", e))
        })?;
        let status: String = row.try_get("status").unwrap_or_else(|_| "pending".to_string());
        let submitted_date: DateTime<Utc> =
            row.try_get("submitted_date").unwrap_or_else(|_| Utc::now());

        let invoice_index: i64 = row.try_get("invoice_index").unwrap_or_default();

        Ok(StoredInvoice {
            invoice_id: invoice_id.to_string(),
            user_id: row.try_get("user_id").unwrap_or_default(),
            manager_id: row.try_get("manager_id").ok(),
            invoice_index: invoice_index as usize,
            record,
            status: Self::status_from_db(&status),
            submitted_date,
            approved_date: row.try_get("approved_date").ok(),
            rejection_reason: row.try_get("rejection_reason").ok(),
            workflow_session_id: row.try_get("workflow_session_id").unwrap_or_else(|_| Uuid::nil()),
        })
    }
}

#[async_trait::async_trait]
impl InvoiceStore for PgInvoiceStore {
    async fn save(&self, invoice: &InvoiceRecord, meta: &SubmissionMeta) -> Result<String> {
        self.ensure_schema().await?;

        let record_json = serde_json::to_string(invoice)?;

        // Idempotent re-save for the same session position (retried
        // confirm); identical records at other positions insert normally
        let existing = sqlx::query(
            "SELECT invoice_id FROM invoices WHERE workflow_session_id = $1 AND invoice_index = $2",
        )
        .bind(meta.session_id)
        .bind(meta.invoice_index as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            WorkflowError::PersistenceFailure(format!("Failed to check for existing invoice: {}", e))
        })?;

        if let Some(row) = existing {
            let invoice_id: Uuid = row.try_get("invoice_id").map_err(|e| {
                WorkflowError::DatabaseError(format!("Failed to read invoice id: {}", e))
            })?;
            return Ok(invoice_id.to_string());
        }

        let invoice_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO invoices
              (invoice_id, user_id, manager_id, invoice_index, record, status, submitted_date, workflow_session_id)
            VALUES
              ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(invoice_id)
        .bind(&meta.user_id)
        .bind(&self.default_manager)
        .bind(meta.invoice_index as i64)
        .bind(&record_json)
        .bind(Self::status_to_db(InvoiceStatus::Pending))
        .bind(Utc::now())
        .bind(meta.session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            WorkflowError::PersistenceFailure(format!("Failed to insert invoice: {}", e))
        })?;

        Ok(invoice_id.to_string())
    }

    async fn get(&self, invoice_id: &str) -> Result<Option<StoredInvoice>> {
        self.ensure_schema().await?;

        let id = Uuid::parse_str(invoice_id)
            .map_err(|_| WorkflowError::InvalidInput(format!("Invalid invoice id: {}", invoice_id)))?;

        let row = sqlx::query("SELECT * FROM invoices WHERE invoice_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                WorkflowError::DatabaseError(format!("Failed to load invoice: {}", e))
            })?;

        row.map(|r| Self::row_to_stored(&r)).transpose()
    }

    async fn list_pending(&self, manager_id: &str) -> Result<Vec<StoredInvoice>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM invoices
            WHERE manager_id = $1 AND status = 'pending'
            ORDER BY submitted_date ASC
            "#,
        )
        .bind(manager_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            WorkflowError::DatabaseError(format!("Failed to list pending invoices: {}", e))
        })?;

        rows.iter().map(Self::row_to_stored).collect()
    }

    async fn update_status(
        &self,
        invoice_id: &str,
        status: InvoiceStatus,
        reason: Option<String>,
    ) -> Result<()> {
        self.ensure_schema().await?;

        let id = Uuid::parse_str(invoice_id)
            .map_err(|_| WorkflowError::InvalidInput(format!("Invalid invoice id: {}", invoice_id)))?;

        let approved_date = match status {
            InvoiceStatus::Approved => Some(Utc::now()),
            _ => None,
        };
        let rejection_reason = match status {
            InvoiceStatus::Rejected => reason,
            _ => None,
        };

        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET status = $2,
                approved_date = COALESCE($3, approved_date),
                rejection_reason = COALESCE($4, rejection_reason)
            WHERE invoice_id = $1
            "#,
        )
        .bind(id)
        .bind(Self::status_to_db(status))
        .bind(approved_date)
        .bind(rejection_reason)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            WorkflowError::DatabaseError(format!("Failed to update invoice status: {}", e))
        })?;

        if result.rows_affected() == 0 {
            return Err(WorkflowError::StoreError(format!(
                "Invoice not found: {}",
                invoice_id
            )));
        }

        Ok(())
    }
}
