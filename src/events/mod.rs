//! Lifecycle events for notification and audit consumers

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::loan::{Initiator, LoanStatus};

/// One status change of one loan. Persisted to the activity log in the same
/// unit of work as the change, then published on the [`EventBus`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleEvent {
    pub id: Uuid,
    pub loan_id: Uuid,
    /// `None` for creation
    pub from_status: Option<LoanStatus>,
    pub to_status: LoanStatus,
    pub actor: Initiator,
    pub occurred_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(
        loan_id: Uuid,
        from_status: Option<LoanStatus>,
        to_status: LoanStatus,
        actor: Initiator,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan_id,
            from_status,
            to_status,
            actor,
            occurred_at,
        }
    }
}

/// Fan-out of committed lifecycle events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    /// Publish committed events. Having no subscribers is not an error.
    pub fn publish(&self, events: impl IntoIterator<Item = LifecycleEvent>) {
        for event in events {
            tracing::debug!(
                loan_id = %event.loan_id,
                from = ?event.from_status,
                to = %event.to_status,
                actor = event.actor.kind(),
                "Publishing lifecycle event"
            );
            let _ = self.tx.send(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
