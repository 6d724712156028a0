//! The single tracked record and its wire format.
//!
//! Exactly one logical record exists in the system. It is identified by a
//! fixed constant key rather than a generated identifier: [`SINGLETON_ID`] for
//! the durable row and [`LAST_INFO_KEY`] for the cache slot.
//!
//! # Wire format
//!
//! The same JSON document is used as the event payload and the cache value:
//!
//! ```text
//! { "timestamp": "2024-01-01T12:00:00.000000Z", "info": "<raw origin body>" }
//! ```
//!
//! Decoding also accepts an integer epoch in milliseconds for `timestamp`.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Durable row identity of the singleton record.
pub const SINGLETON_ID: i32 = 1;

/// Cache key of the singleton record.
pub const LAST_INFO_KEY: &str = "LastInfo";

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Capture an observation instant.
///
/// Truncated to microseconds so the value survives a PostgreSQL `TIMESTAMPTZ`
/// round trip unchanged.
pub fn observation_instant() -> Timestamp {
    Utc::now().trunc_subsecs(6)
}

/// One immutable observation of the origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// When the value was observed (captured before the origin call).
    #[serde(with = "wire_timestamp")]
    pub timestamp: Timestamp,
    /// Raw response body from the origin.
    #[serde(rename = "info")]
    pub payload: String,
}

impl Record {
    pub fn new(timestamp: Timestamp, payload: impl Into<String>) -> Self {
        Self {
            timestamp,
            payload: payload.into(),
        }
    }

    /// Create a record stamped with the current observation instant.
    pub fn observed_now(payload: impl Into<String>) -> Self {
        Self::new(observation_instant(), payload)
    }

    /// Strictly newer than `other`. Equal timestamps are not newer.
    pub fn is_newer_than(&self, other: &Record) -> bool {
        self.timestamp > other.timestamp
    }

    /// Encode into the JSON wire format.
    pub fn to_wire(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode from the JSON wire format.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

mod wire_timestamp {
    use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Rfc3339(String),
        EpochMillis(i64),
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        match RawTimestamp::deserialize(d)? {
            RawTimestamp::Rfc3339(text) => DateTime::parse_from_rfc3339(&text)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(D::Error::custom),
            RawTimestamp::EpochMillis(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| D::Error::custom(format!("epoch millis out of range: {ms}"))),
        }
    }
}
