use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted by the lifecycle, debt, and cleanup services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    RequestCreated {
        request_id: Uuid,
        requester_id: Uuid,
        folio: String,
    },
    RequestApproved {
        request_id: Uuid,
        requester_id: Uuid,
        approver_id: Uuid,
    },
    RequestRejected {
        request_id: Uuid,
        requester_id: Uuid,
    },
    RequestCancelled {
        request_id: Uuid,
        requester_id: Uuid,
        by_requester: bool,
    },
    RequestDelivered {
        request_id: Uuid,
        requester_id: Uuid,
        debt_count: usize,
    },
    RequestExpired {
        request_id: Uuid,
        requester_id: Uuid,
    },
    DebtSettled {
        request_id: Uuid,
        requester_id: Uuid,
    },
}

impl Event {
    /// The user a notification about this event should reach, if any.
    fn notify_target(&self) -> Option<(Uuid, &'static str, String)> {
        match self {
            Event::RequestCreated { requester_id, folio, .. } => Some((
                *requester_id,
                "request_created",
                format!("Request {} was submitted", folio),
            )),
            Event::RequestApproved { requester_id, .. } => Some((
                *requester_id,
                "request_approved",
                "Your request was approved and stock has been reserved".to_string(),
            )),
            Event::RequestRejected { requester_id, .. } => Some((
                *requester_id,
                "request_rejected",
                "Your request was rejected".to_string(),
            )),
            Event::RequestCancelled { requester_id, .. } => Some((
                *requester_id,
                "request_cancelled",
                "Your request was cancelled".to_string(),
            )),
            Event::RequestDelivered { requester_id, debt_count, .. } => Some((
                *requester_id,
                "request_delivered",
                format!("Materials delivered; {} item(s) pending return", debt_count),
            )),
            Event::RequestExpired { requester_id, .. } => Some((
                *requester_id,
                "request_expired",
                "Your request expired because it was never picked up".to_string(),
            )),
            Event::DebtSettled { requester_id, .. } => Some((
                *requester_id,
                "debt_settled",
                "All borrowed materials were returned".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Outbound notification dispatch. The transport (push, email, in-app) lives
/// outside this service; failures are logged and swallowed so they never
/// block the operation that emitted the event.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: Uuid, kind: &str, message: &str) -> Result<(), String>;
}

/// Default notifier: logs the notification and nothing else.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: Uuid, kind: &str, message: &str) -> Result<(), String> {
        info!(user_id = %user_id, kind = kind, message = message, "notification");
        Ok(())
    }
}

/// Drains the event channel, dispatching notifications until all senders
/// are dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, notifier: Arc<dyn Notifier>) {
    while let Some(event) = rx.recv().await {
        if let Some((user_id, kind, message)) = event.notify_target() {
            if let Err(e) = notifier.notify(user_id, kind, &message).await {
                warn!(user_id = %user_id, kind = kind, error = %e, "notification dispatch failed");
            }
        }
    }
    info!("Event channel closed; notification dispatch stopped");
}
