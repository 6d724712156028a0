//! lastinfo Storage - Capability Traits and In-Process Implementations
//!
//! Defines the three external capabilities the pipeline consumes:
//!
//! - [`CacheStore`]: key/value cache holding the latest record
//! - [`DurableStore`]: the persistent singleton row
//! - [`EventPublisher`] / [`EventSubscriber`]: at-least-once topic log
//!
//! In-memory implementations back the tests; [`LmdbCacheStore`] is the
//! production cache. The PostgreSQL store and channel live in
//! lastinfo-service.

pub mod cache;
pub mod channel;
pub mod durable;

pub use cache::{
    CacheRecordExt, CacheStats, CacheStore, InMemoryCacheStore, LmdbCacheError, LmdbCacheStore,
};
pub use channel::{
    AckHandle, Delivery, DeliveryCallback, DeliveryReport, EventPublisher, EventSubscriber,
    InMemoryEventChannel, PersistenceStatus, Subscription,
};
pub use durable::{DurableStore, InMemoryDurableStore};
