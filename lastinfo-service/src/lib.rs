//! lastinfo Service - Read Path, Persistence Worker and Adapters
//!
//! Wires the pipeline together:
//!
//! - [`ReadCoordinator`]: origin, then cache, then durable store, under one
//!   deadline, with write-behind to the cache and the event log
//! - [`PersistenceWorker`]: drains the event log into the durable store
//!   without ever regressing the stored timestamp
//! - Adapters: [`HttpOriginFetcher`] (reqwest), [`PgDurableStore`] and
//!   [`PgEventChannel`] (deadpool-postgres), and the LMDB cache from
//!   `lastinfo_storage`

pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod jobs;
pub mod origin;
pub mod pg_channel;
pub mod telemetry;

pub use bootstrap::{open_cache, Backends};
pub use config::ServiceConfig;
pub use coordinator::{CoordinatorMetrics, CoordinatorSnapshot, ReadCoordinator};
pub use db::{DbConfig, PgDurableStore};
pub use error::{ServiceError, ServiceResult};
pub use jobs::{
    event_retention_task, EventLogRetention, PersistenceMetrics, PersistenceSnapshot,
    PersistenceWorker, RetentionConfig, RetentionMetrics, RetentionSnapshot, WorkerState,
};
pub use origin::HttpOriginFetcher;
pub use pg_channel::PgEventChannel;
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
