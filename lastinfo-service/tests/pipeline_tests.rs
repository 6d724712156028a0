//! End-to-end tests of the read path and persistence worker sharing
//! in-memory capabilities.

use std::sync::Arc;
use std::time::Duration;

use lastinfo_core::{FetchError, ReadPathConfig, WorkerConfig, WriteMode};
use lastinfo_service::{PersistenceSnapshot, PersistenceWorker, ReadCoordinator};
use lastinfo_storage::{CacheRecordExt, DurableStore};
use lastinfo_test_utils::{
    assertions, fixtures, record_at, CacheFault, FaultyCacheStore, InMemoryCacheStore,
    InMemoryDurableStore, InMemoryEventChannel, ScriptedOrigin,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

struct Pipeline {
    origin: ScriptedOrigin,
    cache: FaultyCacheStore,
    store: InMemoryDurableStore,
    channel: InMemoryEventChannel,
    coordinator: ReadCoordinator,
    worker_config: WorkerConfig,
}

impl Pipeline {
    fn new(store: InMemoryDurableStore, write_mode: WriteMode) -> Self {
        let origin = ScriptedOrigin::new();
        let cache = FaultyCacheStore::new(InMemoryCacheStore::new());
        let channel = InMemoryEventChannel::new();
        let worker_config = WorkerConfig {
            write_mode,
            retry_backoff: Duration::from_millis(20),
            consume_error_backoff: Duration::from_millis(20),
            ..Default::default()
        };
        let coordinator = ReadCoordinator::new(
            Arc::new(origin.clone()),
            Arc::new(cache.clone()),
            Arc::new(store.clone()),
            Arc::new(channel.clone()),
            ReadPathConfig::default(),
            worker_config.topic.clone(),
        );
        Self {
            origin,
            cache,
            store,
            channel,
            coordinator,
            worker_config,
        }
    }

    fn start_worker(&self) -> (watch::Sender<bool>, JoinHandle<PersistenceSnapshot>) {
        let worker = PersistenceWorker::new(
            Arc::new(self.channel.clone()),
            Arc::new(self.store.clone()),
            None,
            self.worker_config.clone(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run(shutdown_rx).await.snapshot() });
        (shutdown_tx, handle)
    }

    async fn wait_until_drained(&self) {
        let published = self.channel.published(&self.worker_config.topic).len() as i64;
        let (group, topic) = (&self.worker_config.consumer_group, &self.worker_config.topic);
        tokio::time::timeout(WAIT, async {
            while self.channel.committed_offset(group, topic) < Some(published) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("worker did not drain the event log");
    }
}

async fn stop(
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<PersistenceSnapshot>,
) -> PersistenceSnapshot {
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(WAIT, handle).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_fresh_origin_value_reaches_cache_log_and_store() {
    let pipeline = Pipeline::new(
        fixtures::store_holding(fixtures::stale_weather()),
        WriteMode::ReadModifyWrite,
    );
    pipeline
        .cache
        .inner()
        .set_record(&fixtures::stale_weather(), WAIT)
        .await
        .unwrap();
    pipeline.origin.push_record(fixtures::fresh_weather()).await;

    let payload = pipeline.coordinator.get_latest_default().await;
    assert_eq!(payload.as_deref(), Some(r#"{"temp":20}"#));

    assert!(pipeline.coordinator.flush_write_behind(WAIT).await);
    assert_eq!(
        assertions::cached_record(pipeline.cache.inner()).await,
        Some(fixtures::fresh_weather())
    );
    assert_eq!(
        assertions::published_records(&pipeline.channel, &pipeline.worker_config.topic),
        vec![fixtures::fresh_weather()]
    );

    let (shutdown_tx, handle) = pipeline.start_worker();
    pipeline.wait_until_drained().await;
    let snapshot = stop(shutdown_tx, handle).await;

    assertions::assert_stored(
        &pipeline.store.get_singleton().await.unwrap(),
        &fixtures::fresh_weather(),
    );
    assert_eq!(snapshot.updated, 1);
}

#[tokio::test]
async fn test_persisted_value_survives_origin_and_cache_outage() {
    let pipeline = Pipeline::new(InMemoryDurableStore::new(), WriteMode::ReadModifyWrite);
    let (shutdown_tx, handle) = pipeline.start_worker();

    pipeline.origin.push_record(fixtures::fresh_weather()).await;
    assert!(pipeline.coordinator.get_latest_default().await.is_some());
    assert!(pipeline.coordinator.flush_write_behind(WAIT).await);
    pipeline.wait_until_drained().await;
    stop(shutdown_tx, handle).await;

    pipeline
        .origin
        .push_error(FetchError::BadStatus { status: 503 })
        .await;
    pipeline.cache.set_fault(CacheFault::Unavailable).await;

    let payload = pipeline.coordinator.get_latest_default().await;
    assert_eq!(payload.as_deref(), Some(r#"{"temp":20}"#));
    assert_eq!(pipeline.coordinator.metrics().snapshot().served_from_store, 1);
}

#[tokio::test]
async fn test_out_of_order_publishes_never_regress_store() {
    for mode in [WriteMode::ReadModifyWrite, WriteMode::ConditionalUpdate] {
        let pipeline = Pipeline::new(InMemoryDurableStore::new(), mode);

        // A slow fetch observed at t=1000 finishes after a fast one at t=2000.
        pipeline
            .origin
            .push_slow(Duration::from_millis(150), record_at(1_000, "older"))
            .await;
        pipeline.origin.push_record(record_at(2_000, "newer")).await;

        let slow = pipeline.coordinator.get_latest_default();
        let fast = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            pipeline.coordinator.get_latest_default().await
        };
        let (slow, fast) = tokio::join!(slow, fast);
        assert_eq!(slow.as_deref(), Some("older"));
        assert_eq!(fast.as_deref(), Some("newer"));
        assert!(pipeline.coordinator.flush_write_behind(WAIT).await);

        let (shutdown_tx, handle) = pipeline.start_worker();
        pipeline.wait_until_drained().await;
        let snapshot = stop(shutdown_tx, handle).await;

        assert_eq!(
            pipeline.store.get_singleton().await.unwrap(),
            Some(record_at(2_000, "newer")),
            "{:?}",
            mode
        );
        assert_eq!(snapshot.skipped_stale, 1);
    }
}

#[tokio::test]
async fn test_restarted_worker_resumes_from_committed_cursor() {
    let pipeline = Pipeline::new(InMemoryDurableStore::new(), WriteMode::ReadModifyWrite);

    pipeline.origin.push_record(record_at(1, "first")).await;
    pipeline.coordinator.get_latest_default().await;
    assert!(pipeline.coordinator.flush_write_behind(WAIT).await);

    let (shutdown_tx, handle) = pipeline.start_worker();
    pipeline.wait_until_drained().await;
    let first_run = stop(shutdown_tx, handle).await;
    assert_eq!(first_run.inserted, 1);

    pipeline.origin.push_record(record_at(2, "second")).await;
    pipeline.coordinator.get_latest_default().await;
    assert!(pipeline.coordinator.flush_write_behind(WAIT).await);

    let (shutdown_tx, handle) = pipeline.start_worker();
    pipeline.wait_until_drained().await;
    let second_run = stop(shutdown_tx, handle).await;

    assert_eq!(second_run.received, 1);
    assert_eq!(second_run.updated, 1);
    assert_eq!(
        pipeline.store.get_singleton().await.unwrap(),
        Some(record_at(2, "second"))
    );
}
