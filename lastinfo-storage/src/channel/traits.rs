//! Publisher, subscriber and subscription traits.

use async_trait::async_trait;
use lastinfo_core::ChannelError;

/// Whether the channel durably accepted a published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceStatus {
    Persisted,
    NotPersisted(String),
}

/// Outcome of one publish, handed to the delivery callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub topic: String,
    pub status: PersistenceStatus,
}

impl DeliveryReport {
    pub fn persisted(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            status: PersistenceStatus::Persisted,
        }
    }

    pub fn not_persisted(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            status: PersistenceStatus::NotPersisted(reason.into()),
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.status == PersistenceStatus::Persisted
    }
}

/// Invoked once with the outcome of a publish.
pub type DeliveryCallback = Box<dyn FnOnce(DeliveryReport) + Send + 'static>;

/// Position of a delivered message, used to acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckHandle {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// One item read from a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Message { payload: Vec<u8>, ack: AckHandle },
    /// The reader caught up with the log. Emitted once per catch-up.
    EndOfPartition { partition: i32, offset: i64 },
}

/// Fire-and-forget producer side.
pub trait EventPublisher: Send + Sync {
    /// Hand `payload` to the channel and return immediately.
    ///
    /// There is no retry; a message that fails to persist is reported through
    /// `on_delivery` and dropped.
    fn publish(&self, topic: &str, payload: Vec<u8>, on_delivery: Option<DeliveryCallback>);
}

/// Consumer side: opens group-scoped subscriptions.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Subscribe to `topic` as a member of `group`.
    ///
    /// Reading starts at the group's committed cursor, or at the earliest
    /// retained message when the group has never committed.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, ChannelError>;
}

/// A live reader positioned in one topic.
///
/// `recv` must be cancel safe: dropping its future before it completes must
/// not lose a message.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message or end-of-partition marker.
    async fn recv(&mut self) -> Result<Delivery, ChannelError>;

    /// Commit `handle.offset + 1` as the group's cursor. Never moves the
    /// cursor backwards.
    async fn ack(&mut self, handle: &AckHandle) -> Result<(), ChannelError>;

    /// Reposition the reader at the committed cursor so every unacknowledged
    /// message is delivered again.
    async fn rewind(&mut self) -> Result<(), ChannelError>;

    /// Release the subscription.
    async fn close(self: Box<Self>) -> Result<(), ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_report_constructors() {
        assert!(DeliveryReport::persisted("t").is_persisted());

        let report = DeliveryReport::not_persisted("t", "broker down");
        assert!(!report.is_persisted());
        assert_eq!(
            report.status,
            PersistenceStatus::NotPersisted("broker down".to_string())
        );
    }
}
