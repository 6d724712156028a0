//! lastinfo Core - Record, Conflict Resolution and Errors
//!
//! Pure types shared by every other crate: the singleton [`Record`] and its
//! wire format, the [`ConflictResolver`] guarding durable writes, the error
//! taxonomy, configuration, and the [`OriginFetcher`] capability trait.
//! No I/O happens here.

mod config;
mod conflict;
mod error;
mod origin;
mod record;

pub use config::*;
pub use conflict::{ConflictResolver, WriteDecision};
pub use error::*;
pub use origin::OriginFetcher;
pub use record::{observation_instant, Record, Timestamp, LAST_INFO_KEY, SINGLETON_ID};
