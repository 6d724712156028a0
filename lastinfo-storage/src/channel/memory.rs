//! In-memory event channel.
//!
//! A single-partition log per topic, shared by every clone of the channel.
//! Committed cursors are kept per `(group, topic)` and outlive individual
//! subscriptions, so re-subscribing behaves like a consumer restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use lastinfo_core::ChannelError;
use tokio::sync::Notify;

use super::traits::{
    AckHandle, Delivery, DeliveryCallback, DeliveryReport, EventPublisher, EventSubscriber,
    Subscription,
};

const PARTITION: i32 = 0;

#[derive(Debug, Default)]
struct ChannelState {
    logs: HashMap<String, Vec<Vec<u8>>>,
    committed: HashMap<(String, String), i64>,
    reject_reason: Option<String>,
    pending_consume_errors: u32,
    pending_commit_errors: u32,
    pending_subscribe_errors: u32,
    pending_rewind_errors: u32,
}

impl ChannelState {
    fn log_len(&self, topic: &str) -> i64 {
        self.logs.get(topic).map_or(0, |log| log.len() as i64)
    }

    fn committed(&self, group: &str, topic: &str) -> Option<i64> {
        self.committed
            .get(&(group.to_string(), topic.to_string()))
            .copied()
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<ChannelState>,
    appended: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Event channel held in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventChannel {
    shared: Arc<Shared>,
}

impl InMemoryEventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// All payloads ever published to `topic`, in log order.
    pub fn published(&self, topic: &str) -> Vec<Vec<u8>> {
        self.shared.lock().logs.get(topic).cloned().unwrap_or_default()
    }

    /// The group's committed cursor (next offset to read), if any.
    pub fn committed_offset(&self, group: &str, topic: &str) -> Option<i64> {
        self.shared.lock().committed(group, topic)
    }

    /// While set, publishes are dropped and reported as not persisted.
    pub fn reject_publishes(&self, reason: Option<String>) {
        self.shared.lock().reject_reason = reason;
    }

    /// Make the next `count` receive calls fail with a consume error.
    pub fn fail_next_receives(&self, count: u32) {
        self.shared.lock().pending_consume_errors = count;
    }

    /// Make the next `count` acknowledgements fail with a commit error.
    pub fn fail_next_commits(&self, count: u32) {
        self.shared.lock().pending_commit_errors = count;
    }

    /// Make the next `count` subscribe calls fail with a consume error.
    pub fn fail_next_subscribes(&self, count: u32) {
        self.shared.lock().pending_subscribe_errors = count;
    }

    /// Make the next `count` rewinds fail with a consume error.
    pub fn fail_next_rewinds(&self, count: u32) {
        self.shared.lock().pending_rewind_errors = count;
    }
}

impl EventPublisher for InMemoryEventChannel {
    fn publish(&self, topic: &str, payload: Vec<u8>, on_delivery: Option<DeliveryCallback>) {
        let report = {
            let mut state = self.shared.lock();
            match state.reject_reason.clone() {
                Some(reason) => DeliveryReport::not_persisted(topic, reason),
                None => {
                    state.logs.entry(topic.to_string()).or_default().push(payload);
                    DeliveryReport::persisted(topic)
                }
            }
        };

        if report.is_persisted() {
            self.shared.appended.notify_waiters();
        }
        if let Some(callback) = on_delivery {
            callback(report);
        }
    }
}

#[async_trait]
impl EventSubscriber for InMemoryEventChannel {
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, ChannelError> {
        let position = {
            let mut state = self.shared.lock();
            if state.pending_subscribe_errors > 0 {
                state.pending_subscribe_errors -= 1;
                return Err(ChannelError::Consume {
                    topic: topic.to_string(),
                    reason: "injected subscribe failure".to_string(),
                });
            }
            state.committed(group, topic).unwrap_or(0)
        };
        tracing::debug!(topic = %topic, group = %group, position, "In-memory subscription opened");

        Ok(Box::new(InMemorySubscription {
            shared: Arc::clone(&self.shared),
            topic: topic.to_string(),
            group: group.to_string(),
            position,
            eof_reported_at: None,
        }))
    }
}

struct InMemorySubscription {
    shared: Arc<Shared>,
    topic: String,
    group: String,
    position: i64,
    eof_reported_at: Option<i64>,
}

impl InMemorySubscription {
    /// Take the next delivery without waiting, if one is available.
    fn poll_delivery(&mut self) -> Result<Option<Delivery>, ChannelError> {
        let mut state = self.shared.lock();

        if state.pending_consume_errors > 0 {
            state.pending_consume_errors -= 1;
            return Err(ChannelError::Consume {
                topic: self.topic.clone(),
                reason: "injected consume failure".to_string(),
            });
        }

        let log_len = state.log_len(&self.topic);
        if self.position < log_len {
            let payload = state
                .logs
                .get(&self.topic)
                .and_then(|log| log.get(self.position as usize))
                .cloned()
                .unwrap_or_default();
            let ack = AckHandle {
                topic: self.topic.clone(),
                partition: PARTITION,
                offset: self.position,
            };
            self.position += 1;
            return Ok(Some(Delivery::Message { payload, ack }));
        }

        if self.eof_reported_at != Some(self.position) {
            self.eof_reported_at = Some(self.position);
            return Ok(Some(Delivery::EndOfPartition {
                partition: PARTITION,
                offset: self.position,
            }));
        }

        Ok(None)
    }
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn recv(&mut self) -> Result<Delivery, ChannelError> {
        let shared = Arc::clone(&self.shared);
        loop {
            // Register interest before checking the log so an append between
            // the check and the await is not missed.
            let appended = shared.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            if let Some(delivery) = self.poll_delivery()? {
                return Ok(delivery);
            }
            appended.await;
        }
    }

    async fn ack(&mut self, handle: &AckHandle) -> Result<(), ChannelError> {
        let mut state = self.shared.lock();

        if state.pending_commit_errors > 0 {
            state.pending_commit_errors -= 1;
            return Err(ChannelError::Commit {
                topic: handle.topic.clone(),
                offset: handle.offset,
                reason: "injected commit failure".to_string(),
            });
        }

        let next = handle.offset + 1;
        let cursor = state
            .committed
            .entry((self.group.clone(), self.topic.clone()))
            .or_insert(next);
        if *cursor < next {
            *cursor = next;
        }
        Ok(())
    }

    async fn rewind(&mut self) -> Result<(), ChannelError> {
        let committed = {
            let mut state = self.shared.lock();
            if state.pending_rewind_errors > 0 {
                state.pending_rewind_errors -= 1;
                return Err(ChannelError::Consume {
                    topic: self.topic.clone(),
                    reason: "injected rewind failure".to_string(),
                });
            }
            state.committed(&self.group, &self.topic).unwrap_or(0)
        };
        tracing::debug!(
            topic = %self.topic,
            group = %self.group,
            from = self.position,
            to = committed,
            "Rewinding subscription to committed cursor"
        );
        self.position = committed;
        self.eof_reported_at = None;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), ChannelError> {
        tracing::debug!(topic = %self.topic, group = %self.group, "In-memory subscription closed");
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Whatever order offsets are acknowledged in, the committed cursor
        /// ends one past the highest and a fresh subscription starts there.
        #[test]
        fn prop_committed_cursor_is_one_past_highest_ack(
            acks in prop::collection::vec(0i64..20, 1..30)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let channel = InMemoryEventChannel::new();
            for i in 0..21u8 {
                channel.publish("topic", vec![i], None);
            }

            let resumed_at = runtime.block_on(async {
                let mut sub = channel.subscribe("topic", "group").await.unwrap();
                for offset in &acks {
                    let ack = AckHandle { topic: "topic".to_string(), partition: PARTITION, offset: *offset };
                    sub.ack(&ack).await.unwrap();
                }
                sub.close().await.unwrap();

                let mut resumed = channel.subscribe("topic", "group").await.unwrap();
                match resumed.recv().await.unwrap() {
                    Delivery::Message { ack, .. } => ack.offset,
                    other => panic!("unexpected {:?}", other),
                }
            });

            let highest = acks.iter().copied().max().unwrap();
            prop_assert_eq!(channel.committed_offset("group", "topic"), Some(highest + 1));
            prop_assert_eq!(resumed_at, highest + 1);
        }
    }
}
