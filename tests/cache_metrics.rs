use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use flexcache::application::error::{PublishError, StoreError};
use flexcache::application::jobs::{
    JobStore, PersistenceMode, PublishQueue, QueueConfig, StoredResourceResolver,
};
use flexcache::application::publish::{PublishAction, PublishEngine};
use flexcache::cache::{CacheConfig, CacheEntry, CacheKey, CacheTrigger, FlexCache};
use flexcache::domain::entities::PublishJob;
use metrics_util::debugging::DebuggingRecorder;
use time::OffsetDateTime;
use uuid::Uuid;

struct OfflineStore;

#[async_trait]
impl JobStore for OfflineStore {
    async fn create(&self, _job: &PublishJob) -> Result<(), StoreError> {
        Err(StoreError::unavailable("disk detached"))
    }

    async fn update(&self, _job: &PublishJob) -> Result<(), StoreError> {
        Err(StoreError::unavailable("disk detached"))
    }

    async fn delete(&self, _id: Uuid) -> Result<(), StoreError> {
        Err(StoreError::unavailable("disk detached"))
    }

    async fn read_all(
        &self,
        _since: Option<OffsetDateTime>,
        _limit: usize,
    ) -> Result<Vec<PublishJob>, StoreError> {
        Err(StoreError::unavailable("disk detached"))
    }
}

struct AcceptAll;

#[async_trait]
impl PublishAction for AcceptAll {
    async fn publish(&self, _job: &PublishJob) -> Result<(), PublishError> {
        Ok(())
    }
}

fn page(body_len: usize) -> CacheEntry {
    let mut entry = CacheEntry::new();
    entry.append_bytes(vec![b'x'; body_len]);
    entry.complete();
    entry
}

#[tokio::test]
async fn cache_and_queue_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // Output cache: hit, miss, eviction, rejection, invalidation.
    let cache = Arc::new(FlexCache::new(CacheConfig {
        capacity_bytes: 300,
        evict_to_bytes: 200,
        max_entry_bytes: 250,
        ..Default::default()
    }));
    let first = CacheKey::new("/first.html", "");
    let second = CacheKey::new("/second.html", "");

    assert!(cache.get(&first).is_none());
    cache.put(first.clone(), page(100)).expect("admit first");
    assert!(cache.get(&first).is_some());
    cache.put(second.clone(), page(100)).expect("admit second");
    assert!(cache.get(&first).is_none(), "first entry should be evicted");
    assert!(cache.put(CacheKey::new("/huge.html", ""), page(400)).is_err());

    // Publish queue: store failures, depth, publish latency and invalidation.
    let trigger = CacheTrigger::new(Arc::clone(&cache));
    let store: Arc<dyn JobStore> = Arc::new(OfflineStore);
    let queue = PublishQueue::new(
        QueueConfig {
            persistence: PersistenceMode::BestEffort,
            ..Default::default()
        },
        Some(store),
    )
    .with_observer(Arc::new(trigger.clone()));
    queue
        .initialize(&StoredResourceResolver, false)
        .await
        .expect("initialize");
    queue
        .enqueue(PublishJob::new("editor", vec!["/second.html".into()]))
        .await
        .expect("best effort enqueue");

    let engine = PublishEngine::new(Arc::new(queue), trigger, Arc::new(AcceptAll));
    assert_eq!(engine.drain().await.expect("drain"), 1);
    assert!(cache.get(&second).is_none(), "published page should be evicted");

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "flexcache_hit_total",
        "flexcache_miss_total",
        "flexcache_evict_total",
        "flexcache_rejected_total",
        "flexcache_invalidated_total",
        "flexcache_entries",
        "flexcache_cost_bytes",
        "flexcache_queue_depth",
        "flexcache_job_persist_failed_total",
        "flexcache_publish_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
