//! Cache store trait and record helpers.

use std::time::Duration;

use async_trait::async_trait;
use lastinfo_core::{CacheError, Record, LAST_INFO_KEY};

/// Key/value cache with bounded operations.
///
/// Implementations must be safe to share between the read path and the
/// persistence worker. Values are opaque bytes; [`CacheRecordExt`] layers the
/// record wire format on top.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read a value. `Ok(None)` is a miss.
    async fn get(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>, CacheError>;

    /// Overwrite a value unconditionally.
    async fn set(&self, key: &str, value: &[u8], timeout: Duration) -> Result<(), CacheError>;
}

/// Typed access to the singleton record slot.
#[async_trait]
pub trait CacheRecordExt: CacheStore {
    /// Read and decode the cached record.
    ///
    /// A value that does not decode is reported as [`CacheError::Corrupt`].
    async fn get_record(&self, timeout: Duration) -> Result<Option<Record>, CacheError> {
        match self.get(LAST_INFO_KEY, timeout).await? {
            None => Ok(None),
            Some(bytes) => Record::from_wire(&bytes)
                .map(Some)
                .map_err(|e| CacheError::Corrupt {
                    key: LAST_INFO_KEY.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    /// Encode and store the record, replacing whatever is cached.
    async fn set_record(&self, record: &Record, timeout: Duration) -> Result<(), CacheError> {
        let bytes = record.to_wire().map_err(|e| CacheError::Corrupt {
            key: LAST_INFO_KEY.to_string(),
            reason: e.to_string(),
        })?;
        self.set(LAST_INFO_KEY, &bytes, timeout).await
    }
}

impl<T: CacheStore + ?Sized> CacheRecordExt for T {}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of reads that found a value.
    pub hits: u64,
    /// Number of reads that found nothing.
    pub misses: u64,
    /// Number of successful writes.
    pub writes: u64,
    /// Number of operations abandoned at their timeout.
    pub timeouts: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
