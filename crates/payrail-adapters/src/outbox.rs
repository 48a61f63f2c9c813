//! In-memory outbox and the relay that drains it.

use async_trait::async_trait;
use payrail_domain::{CoreError, DomainEvent, EventPublisher, OutboxRecord, StoreError};
use std::sync::{Arc, Mutex};

/// Append-only outbox table. Repositories write event rows here in the same
/// operation as the aggregate write; the relay polls undispatched rows.
#[derive(Default)]
pub struct MemoryOutbox {
    records: Mutex<Vec<OutboxRecord>>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, events: Vec<DomainEvent>) -> Result<(), StoreError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| StoreError::Unavailable("outbox lock poisoned".to_string()))?;
        for event in &events {
            let record = OutboxRecord::from_event(event)
                .map_err(|e| StoreError::RejectedWrite(e.to_string()))?;
            records.push(record);
        }
        Ok(())
    }

    /// Undispatched rows in append order.
    pub fn undispatched(&self) -> Vec<OutboxRecord> {
        self.records
            .lock()
            .map(|records| {
                records
                    .iter()
                    .filter(|record| !record.dispatched)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn mark_dispatched(&self, event_ids: &[payrail_domain::EventId]) {
        if let Ok(mut records) = self.records.lock() {
            for record in records.iter_mut() {
                if event_ids.contains(&record.event_id) {
                    record.dispatched = true;
                }
            }
        }
    }

    pub fn all_records(&self) -> Vec<OutboxRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

/// Polls the outbox and forwards to the publisher, at-least-once.
pub struct OutboxRelay {
    outbox: Arc<MemoryOutbox>,
    publisher: Arc<dyn EventPublisher>,
}

impl OutboxRelay {
    pub fn new(outbox: Arc<MemoryOutbox>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { outbox, publisher }
    }

    /// One polling pass. Returns how many records were dispatched.
    pub async fn drain(&self) -> Result<usize, CoreError> {
        let pending = self.outbox.undispatched();
        if pending.is_empty() {
            return Ok(0);
        }
        let events: Vec<DomainEvent> = pending
            .iter()
            .map(|record| {
                serde_json::from_value(record.payload.clone()).map_err(|e| {
                    CoreError::invariant(format!("undecodable outbox payload: {e}"))
                })
            })
            .collect::<Result<_, _>>()?;
        self.publisher.publish(events).await?;
        let ids: Vec<_> = pending.into_iter().map(|record| record.event_id).collect();
        let count = ids.len();
        self.outbox.mark_dispatched(&ids);
        Ok(count)
    }
}

/// Test publisher that records everything it receives.
#[derive(Default)]
pub struct CollectingPublisher {
    events: Mutex<Vec<DomainEvent>>,
}

impl CollectingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(|event| event.kind()).collect()
    }

    pub fn count_of(&self, kind: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| event.kind() == kind)
            .count()
    }
}

#[async_trait]
impl EventPublisher for CollectingPublisher {
    async fn publish(&self, events: Vec<DomainEvent>) -> Result<(), CoreError> {
        self.events
            .lock()
            .map_err(|_| CoreError::transient("publisher lock poisoned"))?
            .extend(events);
        Ok(())
    }
}
