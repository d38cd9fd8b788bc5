//! REST API server for the invoice reimbursement workflow
//!
//! Exposes the workflow engine and the manager approval surface via HTTP

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::engine::WorkflowEngine;
use crate::error::WorkflowError;
use crate::manager::ManagerService;
use crate::models::{Attachment, WorkflowState};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct AttachmentPayload {
    pub filename: Option<String>,
    pub mime_type: String,
    /// Invoice bytes, base64-encoded for JSON transport
    pub data_base64: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub user_id: String,
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentPayload>,
}

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    /// "approved" or "rejected"
    pub status: String,
    pub reason: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<WorkflowEngine>,
    pub manager: Arc<ManagerService>,
}

/// =============================
/// Helpers
/// =============================

fn decode_attachments(
    payloads: Vec<AttachmentPayload>,
) -> std::result::Result<Vec<Attachment>, String> {
    payloads
        .into_iter()
        .map(|p| {
            let data = base64::engine::general_purpose::STANDARD
                .decode(&p.data_base64)
                .map_err(|e| format!("Invalid base64 attachment data: {}", e))?;
            Ok(Attachment {
                filename: p.filename,
                mime_type: p.mime_type,
                data,
            })
        })
        .collect()
}

fn workflow_error_status(error: &WorkflowError) -> StatusCode {
    match error {
        WorkflowError::SessionBusy(_) => StatusCode::CONFLICT,
        WorkflowError::PersistenceFailure(_) => StatusCode::BAD_GATEWAY,
        WorkflowError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        WorkflowError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn state_payload(state: &WorkflowState) -> serde_json::Value {
    serde_json::json!({
        "session_id": state.session_id,
        "stage": state.stage,
        "message": state.last_assistant_message(),
        "invoices": state.invoices,
        "violations": state.violations,
        "notification_sent": state.notification_sent,
    })
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Workflow Endpoints
/// =============================

async fn submit_invoice(
    State(state): State<ApiState>,
    Json(req): Json<SubmitRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(
        user_id = %req.user_id,
        attachment_count = req.attachments.len(),
        "Received invoice submission"
    );

    let attachments = match decode_attachments(req.attachments) {
        Ok(attachments) => attachments,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(ApiResponse::error(e))),
    };

    match state
        .engine
        .submit(&req.user_id, &req.message, attachments)
        .await
    {
        Ok(workflow) => (
            StatusCode::OK,
            Json(ApiResponse::success(state_payload(&workflow))),
        ),
        Err(e) => (
            workflow_error_status(&e),
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

async fn session_status(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.engine.status(&user_id).await {
        Some(workflow) => (
            StatusCode::OK,
            Json(ApiResponse::success(state_payload(&workflow))),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(
                "No active session for this user; start a new request".into(),
            )),
        ),
    }
}

async fn cancel_session(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    if state.engine.cancel(&user_id).await {
        (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "cancelled": true
            }))),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(
                "No active session for this user".into(),
            )),
        )
    }
}

/// =============================
/// Manager Endpoints
/// =============================

async fn pending_invoices(
    State(state): State<ApiState>,
    Path(manager_id): Path<String>,
    Query(query): Query<PendingQuery>,
) -> (StatusCode, Json<ApiResponse>) {
    match state
        .manager
        .pending(&manager_id, query.page, query.page_size)
        .await
    {
        Ok(page) => (StatusCode::OK, Json(ApiResponse::success(page))),
        Err(e) => (
            workflow_error_status(&e),
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

async fn update_invoice_status(
    State(state): State<ApiState>,
    Path(invoice_id): Path<String>,
    Json(req): Json<StatusUpdateRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let results = match req.status.to_lowercase().as_str() {
        "approved" => state.manager.approve(&[invoice_id]).await,
        "rejected" => {
            let reason = req.reason.unwrap_or_else(|| "Rejected by manager".into());
            state.manager.reject(&[invoice_id], &reason).await
        }
        other => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error(format!(
                    "Unsupported status '{}': expected 'approved' or 'rejected'",
                    other
                ))),
            )
        }
    };

    let result = &results[0];
    if result.updated {
        (StatusCode::OK, Json(ApiResponse::success(result)))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(
                result.error.clone().unwrap_or_else(|| "Update failed".into()),
            )),
        )
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(engine: Arc<WorkflowEngine>, manager: Arc<ManagerService>) -> Router {
    let state = ApiState { engine, manager };

    Router::new()
        .route("/health", get(health))
        .route("/api/invoices", post(submit_invoice))
        .route("/api/invoices/:user_id/status", get(session_status))
        .route("/api/invoices/:user_id/cancel", post(cancel_session))
        .route("/api/manager/:manager_id/pending", get(pending_invoices))
        .route(
            "/api/manager/invoices/:invoice_id/status",
            post(update_invoice_status),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    engine: Arc<WorkflowEngine>,
    manager: Arc<ManagerService>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(engine, manager);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
