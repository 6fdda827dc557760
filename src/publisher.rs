//! Status-change publication.
//!
//! Status-change events fan out on a broadcast channel to the incident and
//! notification collaborators. Delivery is fire-and-forget: a missing or
//! slow consumer never rolls back or blocks the persisted health state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::db::{Status, TargetKind};

/// Emitted when a target's persisted `status` actually changed value.
#[derive(Debug, Clone, Serialize)]
pub struct StatusChangeEvent {
    pub target_id: i64,
    pub target_kind: TargetKind,
    pub target_name: String,
    pub previous_status: Status,
    pub new_status: Status,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Fan-out handle for status-change events.
#[derive(Clone)]
pub struct Publisher {
    tx: broadcast::Sender<StatusChangeEvent>,
}

impl Publisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChangeEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Failures are logged and swallowed; the probe result
    /// already persisted is the source of truth.
    pub fn publish(&self, event: StatusChangeEvent) {
        tracing::info!(
            "Status change for {}/{} ({}): {} -> {}",
            event.target_kind.as_str(),
            event.target_id,
            event.target_name,
            event.previous_status,
            event.new_status,
        );
        if let Err(e) = self.tx.send(event) {
            tracing::debug!("No status-change subscribers: {}", e);
        }
    }
}
