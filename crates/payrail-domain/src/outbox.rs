//! Outbox pattern primitives.
//!
//! Repositories drain aggregate changesets into outbox records atomically
//! with the aggregate write; a relay polls undispatched records and forwards
//! them to the `EventPublisher` port. Delivery is at-least-once and
//! consumers dedup by `event_id`.

use crate::error::CoreError;
use crate::event::DomainEvent;
use crate::ids::EventId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A pending domain event awaiting publication.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub event_id: EventId,
    pub aggregate_id: String,
    pub kind: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub dispatched: bool,
}

impl OutboxRecord {
    pub fn from_event(event: &DomainEvent) -> Result<Self, CoreError> {
        let payload = serde_json::to_value(event)
            .map_err(|e| CoreError::invariant(format!("unserializable event: {e}")))?;
        let header = event.header();
        Ok(Self {
            event_id: header.event_id.clone(),
            aggregate_id: header.aggregate_id.clone(),
            kind: event.kind().to_string(),
            occurred_at: header.occurred_at,
            payload,
            dispatched: false,
        })
    }
}

/// Outbound publication port. Thread-safe, append-only from the caller's
/// point of view; implementations deliver at-least-once.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, events: Vec<DomainEvent>) -> Result<(), CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventHeader;
    use crate::ids::PaymentId;

    #[test]
    fn record_carries_header_fields() {
        let event = DomainEvent::PaymentCompleted {
            header: EventHeader::new("pay-9"),
            payment_id: PaymentId::new("pay-9").unwrap(),
        };
        let record = OutboxRecord::from_event(&event).unwrap();
        assert_eq!(record.aggregate_id, "pay-9");
        assert_eq!(record.kind, "PaymentCompleted");
        assert!(!record.dispatched);
        assert_eq!(record.payload["kind"], "PaymentCompleted");
    }
}
