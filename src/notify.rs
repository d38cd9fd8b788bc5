//! Notification delivery seam
//!
//! The engine fires one event when a session reaches the notified stage.
//! Delivery failures never roll back the transition: the invoices are
//! already persisted by the time the notifier runs.

use crate::models::NotificationEvent;
use crate::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Trait for outbound status notifications
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> Result<()>;
}

/// Notifier that renders events to the log (stand-in for email/chat
/// delivery in single-process deployments)
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<()> {
        info!(
            user_id = %event.user_id,
            stage = %event.stage,
            summary = %event.summary,
            "Manager notification dispatched"
        );
        Ok(())
    }
}

/// Test double that records every event it receives
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<NotificationEvent>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().await.clone()
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}
