//! Error types for the invoice workflow engine

use thiserror::Error;

/// Result type alias for workflow operations
pub type Result<T> = std::result::Result<T, WorkflowError>;

#[derive(Error, Debug)]
pub enum WorkflowError {

    // =============================
    // Core Workflow Errors
    // =============================

    #[error("Session is busy: {0}")]
    SessionBusy(String),

    #[error("No active session for user: {0}")]
    SessionNotFound(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Invoice store error: {0}")]
    StoreError(String),

    #[error("Notification error: {0}")]
    NotificationError(String),

    #[error("Extraction error: {0}")]
    ExtractionError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
