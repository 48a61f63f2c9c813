//! In-memory reference adapters for the Payrail core ports.
//!
//! Suitable for development and testing; production deployments plug
//! persistent backends, real clearing connectors and a message bus into the
//! same ports.

#![deny(unsafe_code)]

pub mod accounts;
pub mod clearing;
pub mod outbox;
pub mod repositories;
pub mod rules;

pub use accounts::MemoryAccountAdapter;
pub use clearing::{MemoryClearingAdapter, MemoryNotificationPort, MemorySettlementPort};
pub use outbox::{CollectingPublisher, MemoryOutbox, OutboxRelay};
pub use repositories::{
    MemoryPaymentRepository, MemorySagaRepository, MemoryTransactionRepository,
};
pub use rules::{MemoryRoutingRules, MemoryRuleContext, StaticValidationRules};
