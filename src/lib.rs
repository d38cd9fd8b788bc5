//! Invoice Reimbursement Workflow Engine
//!
//! A durable, multi-turn workflow that:
//! - Extracts structured invoice records from chat messages and attachments
//! - Validates them against reimbursement policy
//! - Suspends for user corrections and final confirmation
//! - Persists approved submissions and notifies the approving manager
//!
//! STATE MACHINE:
//! starting → analysis → verification → {awaiting_fixes ⇄ analysis}
//!                                    | → awaiting_confirmation → {notified | cancelled}

pub mod api;
pub mod engine;
pub mod error;
pub mod extraction;
pub mod manager;
pub mod models;
pub mod notify;
pub mod policy;
pub mod reconcile;
pub mod session;
pub mod store;

pub use error::Result;

// Re-export common types
pub use engine::WorkflowEngine;
pub use models::*;
