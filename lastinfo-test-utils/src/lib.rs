//! lastinfo Test Utilities
//!
//! Centralized test infrastructure for the lastinfo workspace:
//! - Scripted and fault-injecting capability implementations
//! - Proptest generators for records and delivery sequences
//! - Test fixtures for common scenarios
//! - Custom assertions for pipeline-specific validation

// Re-export in-memory capabilities from their source crate
pub use lastinfo_storage::{InMemoryCacheStore, InMemoryDurableStore, InMemoryEventChannel};

// Re-export core types for convenience
pub use lastinfo_core::{
    CacheError, FetchError, OriginFetcher, Record, StoreError, Timestamp, WriteDecision,
    LAST_INFO_KEY, SINGLETON_ID,
};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use lastinfo_core::observation_instant;
use lastinfo_storage::{CacheStore, DurableStore};
use tokio::sync::Mutex;

/// Build a record at an epoch-millisecond instant.
pub fn record_at(ms: i64, payload: impl Into<String>) -> Record {
    let timestamp = Utc
        .timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(observation_instant);
    Record::new(timestamp, payload)
}

// ============================================================================
// SCRIPTED ORIGIN
// ============================================================================

#[derive(Debug, Clone)]
struct OriginStep {
    delay: Duration,
    outcome: Result<Record, FetchError>,
}

/// Origin that replays queued responses in order.
///
/// Delays are slept in full regardless of the requested timeout, which makes
/// this usable as a misbehaving origin when testing deadline enforcement.
/// An exhausted script answers with a network error.
#[derive(Debug, Clone, Default)]
pub struct ScriptedOrigin {
    steps: Arc<Mutex<VecDeque<OriginStep>>>,
    calls: Arc<AtomicU64>,
    last_timeout_ms: Arc<AtomicU64>,
}

impl ScriptedOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response.
    pub async fn push_record(&self, record: Record) {
        self.push(Duration::ZERO, Ok(record)).await;
    }

    /// Queue a successful response delivered after `delay`.
    pub async fn push_slow(&self, delay: Duration, record: Record) {
        self.push(delay, Ok(record)).await;
    }

    /// Queue a failure.
    pub async fn push_error(&self, error: FetchError) {
        self.push(Duration::ZERO, Err(error)).await;
    }

    async fn push(&self, delay: Duration, outcome: Result<Record, FetchError>) {
        self.steps
            .lock()
            .await
            .push_back(OriginStep { delay, outcome });
    }

    /// Number of fetches issued so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Timeout passed to the most recent fetch.
    pub fn last_timeout(&self) -> Duration {
        Duration::from_millis(self.last_timeout_ms.load(Ordering::Relaxed))
    }
}

#[async_trait]
impl OriginFetcher for ScriptedOrigin {
    async fn fetch(&self, timeout: Duration) -> Result<Record, FetchError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.last_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);

        let step = self.steps.lock().await.pop_front();
        match step {
            Some(step) => {
                if !step.delay.is_zero() {
                    tokio::time::sleep(step.delay).await;
                }
                step.outcome
            }
            None => Err(FetchError::Network {
                reason: "no scripted response".to_string(),
            }),
        }
    }
}

// ============================================================================
// FAULT-INJECTING CACHE
// ============================================================================

/// Failure mode of a [`FaultyCacheStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheFault {
    #[default]
    Healthy,
    /// Every operation fails with a connectivity error.
    Unavailable,
    /// Every operation stalls for the given duration before reaching the
    /// inner store, so it times out when the duration exceeds the timeout.
    Stalled(Duration),
}

/// Cache wrapper whose failure mode can be switched at runtime.
#[derive(Debug, Clone, Default)]
pub struct FaultyCacheStore {
    inner: InMemoryCacheStore,
    fault: Arc<Mutex<CacheFault>>,
}

impl FaultyCacheStore {
    pub fn new(inner: InMemoryCacheStore) -> Self {
        Self {
            inner,
            fault: Arc::new(Mutex::new(CacheFault::Healthy)),
        }
    }

    pub async fn set_fault(&self, fault: CacheFault) {
        *self.fault.lock().await = fault;
    }

    pub fn inner(&self) -> &InMemoryCacheStore {
        &self.inner
    }

    async fn check(&self, key: &str, timeout: Duration) -> Result<(), CacheError> {
        let fault = *self.fault.lock().await;
        match fault {
            CacheFault::Healthy => Ok(()),
            CacheFault::Unavailable => Err(CacheError::Connectivity {
                reason: "cache unavailable".to_string(),
            }),
            CacheFault::Stalled(stall) => {
                if stall >= timeout {
                    tokio::time::sleep(timeout).await;
                    Err(CacheError::Timeout {
                        key: key.to_string(),
                        after: timeout,
                    })
                } else {
                    tokio::time::sleep(stall).await;
                    Ok(())
                }
            }
        }
    }
}

#[async_trait]
impl CacheStore for FaultyCacheStore {
    async fn get(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>, CacheError> {
        self.check(key, timeout).await?;
        self.inner.get(key, timeout).await
    }

    async fn set(&self, key: &str, value: &[u8], timeout: Duration) -> Result<(), CacheError> {
        self.check(key, timeout).await?;
        self.inner.set(key, value, timeout).await
    }
}

// ============================================================================
// FLAKY DURABLE STORE
// ============================================================================

/// Durable store wrapper that fails a configurable number of operations.
#[derive(Debug, Clone, Default)]
pub struct FlakyDurableStore {
    inner: InMemoryDurableStore,
    failing_writes: Arc<AtomicU32>,
    failing_reads: Arc<AtomicU32>,
    read_delay_ms: Arc<AtomicU64>,
    attempted_writes: Arc<AtomicU64>,
}

impl FlakyDurableStore {
    pub fn new(inner: InMemoryDurableStore) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    /// Fail the next `count` write attempts with a connectivity error.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` reads with a connectivity error.
    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Delay every read by `delay`.
    pub fn delay_reads(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Write attempts seen so far, failed ones included.
    pub fn attempted_writes(&self) -> u64 {
        self.attempted_writes.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryDurableStore {
        &self.inner
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn injected() -> StoreError {
        StoreError::Connectivity {
            reason: "injected store failure".to_string(),
        }
    }

    fn begin_write(&self) -> Result<(), StoreError> {
        self.attempted_writes.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_writes) {
            return Err(Self::injected());
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for FlakyDurableStore {
    async fn get_singleton(&self) -> Result<Option<Record>, StoreError> {
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if Self::take_failure(&self.failing_reads) {
            return Err(Self::injected());
        }
        self.inner.get_singleton().await
    }

    async fn upsert_singleton(&self, record: &Record) -> Result<(), StoreError> {
        self.begin_write()?;
        self.inner.upsert_singleton(record).await
    }

    async fn upsert_if_newer(&self, record: &Record) -> Result<WriteDecision, StoreError> {
        self.begin_write()?;
        self.inner.upsert_if_newer(record).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating records and delivery sequences.

    use super::*;
    use proptest::prelude::*;

    /// Generate a microsecond-precision Timestamp (2020-2030).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_577_836_800_000_000i64..1_893_456_000_000_000i64).prop_map(|micros| {
            chrono::DateTime::from_timestamp_micros(micros).unwrap_or_else(observation_instant)
        })
    }

    /// Generate an origin payload (a small JSON document).
    pub fn arb_payload() -> impl Strategy<Value = String> {
        (-40i32..50).prop_map(|temp| format!("{{\"temp\":{temp}}}"))
    }

    /// Generate a Record.
    pub fn arb_record() -> impl Strategy<Value = Record> {
        (arb_timestamp(), arb_payload()).prop_map(|(timestamp, payload)| Record::new(timestamp, payload))
    }

    /// Generate a delivery sequence drawn from a small timestamp pool, so
    /// duplicates and out-of-order arrivals are frequent.
    pub fn arb_delivery_sequence() -> impl Strategy<Value = Vec<Record>> {
        prop::collection::vec((0i64..20, arb_payload()), 1..30).prop_map(|items| {
            items
                .into_iter()
                .map(|(ms, payload)| record_at(1_000 + ms, payload))
                .collect()
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built records for the common scenarios.

    use super::*;

    /// `{"temp":18}` observed at t=900ms.
    pub fn stale_weather() -> Record {
        record_at(900, r#"{"temp":18}"#)
    }

    /// `{"temp":20}` observed at t=1000ms.
    pub fn fresh_weather() -> Record {
        record_at(1_000, r#"{"temp":20}"#)
    }

    /// A durable store already holding `record`.
    pub fn store_holding(record: Record) -> InMemoryDurableStore {
        InMemoryDurableStore::with_record(record)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over capability state.

    use super::*;
    use lastinfo_storage::CacheRecordExt;

    const PEEK_TIMEOUT: Duration = Duration::from_secs(1);

    /// Assert the durable store holds exactly `expected`.
    #[track_caller]
    pub fn assert_stored(actual: &Option<Record>, expected: &Record) {
        match actual {
            Some(record) => assert_eq!(record, expected, "durable store holds a different record"),
            None => panic!("Expected stored record {:?}, store is empty", expected),
        }
    }

    /// Read the cached record, panicking on cache errors.
    pub async fn cached_record(cache: &InMemoryCacheStore) -> Option<Record> {
        match cache.get_record(PEEK_TIMEOUT).await {
            Ok(record) => record,
            Err(e) => panic!("Cache read failed: {}", e),
        }
    }

    /// Decode every payload published to `topic`.
    pub fn published_records(channel: &InMemoryEventChannel, topic: &str) -> Vec<Record> {
        channel
            .published(topic)
            .iter()
            .map(|bytes| match Record::from_wire(bytes) {
                Ok(record) => record,
                Err(e) => panic!("Published payload does not decode: {}", e),
            })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
