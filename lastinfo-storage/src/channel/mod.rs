//! Event channel capability.
//!
//! An append-only topic log with consumer-group cursors, delivering each
//! message at least once. Publishing never blocks the caller; the outcome is
//! reported through an optional [`DeliveryCallback`].

mod memory;
mod traits;

pub use memory::InMemoryEventChannel;
pub use traits::{
    AckHandle, Delivery, DeliveryCallback, DeliveryReport, EventPublisher, EventSubscriber,
    PersistenceStatus, Subscription,
};
