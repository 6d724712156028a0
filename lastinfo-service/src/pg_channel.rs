//! PostgreSQL-backed event log.
//!
//! Topics are rows of `lastinfo_events` with dense per-topic offsets; consumer
//! groups keep their cursor ("next offset to read") in
//! `lastinfo_consumer_offsets`. Publishers serialize per topic on a
//! transaction-scoped advisory lock, so offsets become visible in order and a
//! polling reader never skips a slower concurrent append.
//!
//! Events below every group's committed cursor are deleted by
//! [`EventLogRetention::prune_committed`]; the newest event of a topic always
//! stays so the next append continues its offset sequence.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use lastinfo_core::ChannelError;
use lastinfo_storage::{
    AckHandle, Delivery, DeliveryCallback, DeliveryReport, EventPublisher, EventSubscriber,
    Subscription,
};

use crate::error::consume_error;
use crate::jobs::EventLogRetention;

const PARTITION: i32 = 0;

const CREATE_TABLES_SQL: &str = "
    CREATE TABLE IF NOT EXISTS lastinfo_events (
        topic        TEXT        NOT NULL,
        event_offset BIGINT      NOT NULL,
        payload      BYTEA       NOT NULL,
        published_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (topic, event_offset)
    );
    CREATE TABLE IF NOT EXISTS lastinfo_consumer_offsets (
        consumer_group TEXT   NOT NULL,
        topic          TEXT   NOT NULL,
        next_offset    BIGINT NOT NULL,
        PRIMARY KEY (consumer_group, topic)
    );";

const LOCK_TOPIC_SQL: &str = "SELECT pg_advisory_xact_lock(hashtext($1))";

const APPEND_SQL: &str = "
    INSERT INTO lastinfo_events (topic, event_offset, payload)
    SELECT $1, COALESCE(MAX(event_offset) + 1, 0), $2
    FROM lastinfo_events WHERE topic = $1
    RETURNING event_offset";

const FETCH_BATCH_SQL: &str = "
    SELECT event_offset, payload FROM lastinfo_events
    WHERE topic = $1 AND event_offset >= $2
    ORDER BY event_offset
    LIMIT $3";

const PRUNE_COMMITTED_SQL: &str = "
    DELETE FROM lastinfo_events
    WHERE topic = $1
      AND event_offset < (SELECT MIN(next_offset) FROM lastinfo_consumer_offsets WHERE topic = $1)
      AND event_offset < (SELECT MAX(event_offset) FROM lastinfo_events WHERE topic = $1)";

const SELECT_CURSOR_SQL: &str =
    "SELECT next_offset FROM lastinfo_consumer_offsets WHERE consumer_group = $1 AND topic = $2";

const COMMIT_CURSOR_SQL: &str = "
    INSERT INTO lastinfo_consumer_offsets (consumer_group, topic, next_offset) VALUES ($1, $2, $3)
    ON CONFLICT (consumer_group, topic) DO UPDATE
        SET next_offset = GREATEST(lastinfo_consumer_offsets.next_offset, EXCLUDED.next_offset)";

/// Event log stored in PostgreSQL.
#[derive(Clone)]
pub struct PgEventChannel {
    pool: Pool,
    poll_interval: Duration,
    batch_size: i64,
}

impl PgEventChannel {
    pub fn new(pool: Pool, poll_interval: Duration, batch_size: i64) -> Self {
        Self {
            pool,
            poll_interval,
            batch_size,
        }
    }

    /// Create the event and cursor tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), ChannelError> {
        let conn = checkout(&self.pool, "lastinfo_events").await?;
        conn.batch_execute(CREATE_TABLES_SQL)
            .await
            .map_err(|e| consume_error("lastinfo_events", e))?;
        tracing::debug!("Event log tables ready");
        Ok(())
    }
}

async fn checkout(pool: &Pool, topic: &str) -> Result<Object, ChannelError> {
    pool.get().await.map_err(|e| consume_error(topic, e))
}

/// Append one event and return its offset.
async fn append(pool: &Pool, topic: &str, payload: &[u8]) -> Result<i64, String> {
    let mut conn = pool.get().await.map_err(|e| e.to_string())?;
    let txn = conn.transaction().await.map_err(|e| e.to_string())?;
    txn.execute(LOCK_TOPIC_SQL, &[&topic])
        .await
        .map_err(|e| e.to_string())?;
    let row = txn
        .query_one(APPEND_SQL, &[&topic, &payload])
        .await
        .map_err(|e| e.to_string())?;
    txn.commit().await.map_err(|e| e.to_string())?;
    Ok(row.get(0))
}

/// Delete committed events under the topic lock so no append interleaves.
async fn prune(pool: &Pool, topic: &str) -> Result<u64, String> {
    let mut conn = pool.get().await.map_err(|e| e.to_string())?;
    let txn = conn.transaction().await.map_err(|e| e.to_string())?;
    txn.execute(LOCK_TOPIC_SQL, &[&topic])
        .await
        .map_err(|e| e.to_string())?;
    let pruned = txn
        .execute(PRUNE_COMMITTED_SQL, &[&topic])
        .await
        .map_err(|e| e.to_string())?;
    txn.commit().await.map_err(|e| e.to_string())?;
    Ok(pruned)
}

async fn committed_cursor(conn: &Object, group: &str, topic: &str) -> Result<i64, ChannelError> {
    let row = conn
        .query_opt(SELECT_CURSOR_SQL, &[&group, &topic])
        .await
        .map_err(|e| consume_error(topic, e))?;
    Ok(row.map(|row| row.get(0)).unwrap_or(0))
}

impl EventPublisher for PgEventChannel {
    fn publish(&self, topic: &str, payload: Vec<u8>, on_delivery: Option<DeliveryCallback>) {
        let topic = topic.to_string();

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                if let Some(callback) = on_delivery {
                    callback(DeliveryReport::not_persisted(topic, e.to_string()));
                }
                return;
            }
        };

        let pool = self.pool.clone();
        handle.spawn(async move {
            let report = match append(&pool, &topic, &payload).await {
                Ok(offset) => {
                    tracing::trace!(topic = %topic, offset, "Event appended");
                    DeliveryReport::persisted(&topic)
                }
                Err(reason) => DeliveryReport::not_persisted(&topic, reason),
            };
            if let Some(callback) = on_delivery {
                callback(report);
            }
        });
    }
}

#[async_trait]
impl EventLogRetention for PgEventChannel {
    async fn prune_committed(&self, topic: &str) -> Result<u64, ChannelError> {
        prune(&self.pool, topic)
            .await
            .map_err(|reason| consume_error(topic, reason))
    }
}

#[async_trait]
impl EventSubscriber for PgEventChannel {
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, ChannelError> {
        let conn = checkout(&self.pool, topic).await?;
        let position = committed_cursor(&conn, group, topic).await?;
        tracing::info!(topic = %topic, group = %group, position, "Subscribed to event log");

        Ok(Box::new(PgSubscription {
            pool: self.pool.clone(),
            topic: topic.to_string(),
            group: group.to_string(),
            poll_interval: self.poll_interval,
            batch_size: self.batch_size,
            position,
            eof_reported_at: None,
            buffer: VecDeque::new(),
        }))
    }
}

struct PgSubscription {
    pool: Pool,
    topic: String,
    group: String,
    poll_interval: Duration,
    batch_size: i64,
    position: i64,
    eof_reported_at: Option<i64>,
    buffer: VecDeque<(i64, Vec<u8>)>,
}

impl PgSubscription {
    async fn fetch_batch(&self) -> Result<Vec<(i64, Vec<u8>)>, ChannelError> {
        let conn = checkout(&self.pool, &self.topic).await?;
        let rows = conn
            .query(
                FETCH_BATCH_SQL,
                &[&self.topic, &self.position, &self.batch_size],
            )
            .await
            .map_err(|e| consume_error(&self.topic, e))?;
        Ok(rows.iter().map(|row| (row.get(0), row.get(1))).collect())
    }
}

#[async_trait]
impl Subscription for PgSubscription {
    async fn recv(&mut self) -> Result<Delivery, ChannelError> {
        loop {
            if let Some((offset, payload)) = self.buffer.pop_front() {
                self.position = offset + 1;
                return Ok(Delivery::Message {
                    payload,
                    ack: AckHandle {
                        topic: self.topic.clone(),
                        partition: PARTITION,
                        offset,
                    },
                });
            }

            let batch = self.fetch_batch().await?;
            if !batch.is_empty() {
                self.buffer.extend(batch);
                continue;
            }

            if self.eof_reported_at != Some(self.position) {
                self.eof_reported_at = Some(self.position);
                return Ok(Delivery::EndOfPartition {
                    partition: PARTITION,
                    offset: self.position,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn ack(&mut self, handle: &AckHandle) -> Result<(), ChannelError> {
        let next = handle.offset + 1;
        let conn = self.pool.get().await.map_err(|e| ChannelError::Commit {
            topic: handle.topic.clone(),
            offset: handle.offset,
            reason: e.to_string(),
        })?;
        conn.execute(COMMIT_CURSOR_SQL, &[&self.group, &self.topic, &next])
            .await
            .map_err(|e| ChannelError::Commit {
                topic: handle.topic.clone(),
                offset: handle.offset,
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn rewind(&mut self) -> Result<(), ChannelError> {
        let conn = checkout(&self.pool, &self.topic).await?;
        let committed = committed_cursor(&conn, &self.group, &self.topic).await?;
        tracing::debug!(
            topic = %self.topic,
            group = %self.group,
            from = self.position,
            to = committed,
            "Rewinding subscription to committed cursor"
        );
        self.position = committed;
        self.eof_reported_at = None;
        self.buffer.clear();
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), ChannelError> {
        tracing::info!(topic = %self.topic, group = %self.group, "Event log subscription closed");
        Ok(())
    }
}
