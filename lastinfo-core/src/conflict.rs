//! Timestamp-based conflict resolution for durable writes.
//!
//! A candidate replaces the stored reference only when it is strictly newer.
//! Equal timestamps are rejected, so redelivering an already applied record is
//! a no-op. The durable store timestamp therefore never regresses no matter in
//! which order, or how many times, records are delivered.

use crate::Record;

/// What a durable writer should do with a candidate record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDecision {
    /// No stored record yet: insert the candidate as the singleton row.
    Insert,
    /// Candidate is strictly newer: overwrite timestamp and payload.
    Update,
    /// Candidate is not newer: leave the store untouched.
    Skip,
}

impl WriteDecision {
    pub fn writes(&self) -> bool {
        !matches!(self, WriteDecision::Skip)
    }
}

/// Pure decision function shared by every durable writer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    /// Should `candidate` replace `reference`?
    ///
    /// Always true for the first observation (no reference).
    pub fn should_replace(candidate: &Record, reference: Option<&Record>) -> bool {
        match reference {
            None => true,
            Some(reference) => candidate.is_newer_than(reference),
        }
    }

    /// Classify the write the candidate calls for.
    pub fn decide(candidate: &Record, reference: Option<&Record>) -> WriteDecision {
        match reference {
            None => WriteDecision::Insert,
            Some(_) if Self::should_replace(candidate, reference) => WriteDecision::Update,
            Some(_) => WriteDecision::Skip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(ms: i64, payload: &str) -> Record {
        Record::new(Utc.timestamp_millis_opt(ms).unwrap(), payload)
    }

    #[test]
    fn test_first_observation_is_accepted() {
        let candidate = record(1, "A");
        assert!(ConflictResolver::should_replace(&candidate, None));
        assert_eq!(ConflictResolver::decide(&candidate, None), WriteDecision::Insert);
    }

    #[test]
    fn test_no_regression_against_stored() {
        let stored = record(100, "A");

        for candidate in [record(100, "B"), record(90, "B")] {
            assert!(!ConflictResolver::should_replace(&candidate, Some(&stored)));
            assert_eq!(
                ConflictResolver::decide(&candidate, Some(&stored)),
                WriteDecision::Skip
            );
        }

        let newer = record(101, "B");
        assert!(ConflictResolver::should_replace(&newer, Some(&stored)));
        assert_eq!(
            ConflictResolver::decide(&newer, Some(&stored)),
            WriteDecision::Update
        );
    }

    #[test]
    fn test_decision_writes() {
        assert!(WriteDecision::Insert.writes());
        assert!(WriteDecision::Update.writes());
        assert!(!WriteDecision::Skip.writes());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn apply(stored: Option<Record>, candidate: &Record) -> Option<Record> {
        match ConflictResolver::decide(candidate, stored.as_ref()) {
            WriteDecision::Insert | WriteDecision::Update => Some(candidate.clone()),
            WriteDecision::Skip => stored,
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Any delivery order with duplicates converges to a record carrying
        /// the maximum timestamp, and the stored timestamp never decreases.
        #[test]
        fn prop_converges_to_max_timestamp(
            stamps in prop::collection::vec(0i64..50, 1..40)
        ) {
            let deliveries: Vec<Record> = stamps
                .iter()
                .enumerate()
                .map(|(i, ms)| Record::new(Utc.timestamp_millis_opt(*ms).unwrap(), format!("v{i}")))
                .collect();

            let mut stored: Option<Record> = None;
            for candidate in &deliveries {
                let before = stored.as_ref().map(|r| r.timestamp);
                stored = apply(stored, candidate);
                let after = stored.as_ref().map(|r| r.timestamp);
                prop_assert!(after >= before);
            }

            let max = deliveries.iter().map(|r| r.timestamp).max();
            prop_assert_eq!(stored.as_ref().map(|r| r.timestamp), max);

            // The first delivery carrying the max timestamp wins; later equal ones are rejected.
            let first_max = deliveries.iter().find(|r| Some(r.timestamp) == max).cloned();
            prop_assert_eq!(stored, first_max);
        }

        /// Re-applying the stored record is always a no-op.
        #[test]
        fn prop_redelivery_is_idempotent(ms in 0i64..1_000_000, payload in "[a-z]{0,12}") {
            let stored = Record::new(Utc.timestamp_millis_opt(ms).unwrap(), payload);
            prop_assert_eq!(
                ConflictResolver::decide(&stored.clone(), Some(&stored)),
                WriteDecision::Skip
            );
        }
    }
}
