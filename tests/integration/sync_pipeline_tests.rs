//! Integration tests for the sync pipeline's queue, workers, and overflow.

use std::sync::Arc;
use std::time::Duration;

use chat_bridge::models::payload::SYSTEM_NOTICES_PEER_ID;
use chat_bridge::notify::{LineSink, Notifier, RateLimiter};
use chat_bridge::persistence::db;
use chat_bridge::persistence::overflow_repo::OverflowStore;
use chat_bridge::sync::{EnqueueOutcome, PayloadSink, SyncPipeline};

use super::test_helpers::{fast_sync_config, payload, wait_until, CaptureSink, RecordingSink};

struct Fixture {
    output: Arc<CaptureSink>,
    sink: Arc<RecordingSink>,
    store: Arc<OverflowStore>,
    pipeline: SyncPipeline,
}

async fn fixture(sink: Option<Arc<RecordingSink>>, capacity: usize, workers: usize) -> Fixture {
    let output = Arc::new(CaptureSink::default());
    let store = Arc::new(OverflowStore::new(Arc::new(
        db::connect_memory().await.expect("db"),
    )));
    let recording = sink.clone().unwrap_or_else(RecordingSink::open);
    let pipeline = SyncPipeline::new(
        sink.map(|s| s as Arc<dyn PayloadSink>),
        Arc::clone(&store),
        Notifier::new(Arc::clone(&output) as Arc<dyn LineSink>),
        Arc::new(RateLimiter::new()),
        fast_sync_config(capacity, workers),
    );
    Fixture {
        output,
        sink: recording,
        store,
        pipeline,
    }
}

#[tokio::test]
async fn workers_start_lazily_on_first_enqueue() {
    let fx = fixture(Some(RecordingSink::open()), 10, 2).await;
    assert!(!fx.pipeline.is_running());

    let outcome = fx.pipeline.enqueue(payload(1)).await.expect("enqueue");

    assert_eq!(outcome, EnqueueOutcome::Queued);
    assert!(fx.pipeline.is_running());
    assert!(
        wait_until(Duration::from_secs(2), || async { fx.sink.delivered().len() == 1 }).await,
        "payload delivered"
    );
    fx.pipeline.shutdown().await;
}

#[tokio::test]
async fn disabled_pipeline_discards_without_storing() {
    let fx = fixture(None, 10, 2).await;

    let outcome = fx.pipeline.enqueue(payload(1)).await.expect("enqueue");

    assert_eq!(outcome, EnqueueOutcome::Disabled);
    assert!(!fx.pipeline.is_running());
    assert_eq!(fx.store.count().await.expect("count"), 0);
}

#[tokio::test]
async fn overflow_absorbs_burst_and_every_payload_is_delivered_once() {
    let fx = fixture(Some(RecordingSink::gated()), 2, 1).await;

    let mut overflowed = 0;
    for id in 1..=20 {
        if fx.pipeline.enqueue(payload(id)).await.expect("enqueue") == EnqueueOutcome::Overflowed {
            overflowed += 1;
        }
    }
    assert!(overflowed > 0, "a held worker forces overflow");
    assert!(fx.store.count().await.expect("count") > 0);

    fx.sink.release();

    assert!(
        wait_until(Duration::from_secs(5), || async { fx.sink.delivered().len() >= 20 }).await,
        "all payloads delivered"
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fx.sink.message_ids(), (1..=20).collect::<Vec<_>>(), "exactly once each");
    assert_eq!(fx.store.count().await.expect("count"), 0, "overflow drained");
    fx.pipeline.shutdown().await;
}

#[tokio::test]
async fn queue_full_notice_is_rate_limited() {
    let fx = fixture(Some(RecordingSink::gated()), 1, 1).await;

    for id in 1..=10 {
        fx.pipeline.enqueue(payload(id)).await.expect("enqueue");
    }

    let notices = fx
        .output
        .messages("log")
        .into_iter()
        .filter(|msg| msg == "Queue full, buffering to disk")
        .count();
    assert_eq!(notices, 1);

    fx.sink.release();
    fx.pipeline.shutdown().await;
}

#[tokio::test]
async fn reserved_peer_is_never_handed_to_the_sink() {
    let fx = fixture(Some(RecordingSink::open()), 10, 1).await;
    let mut notice = payload(1);
    notice.peer_id = SYSTEM_NOTICES_PEER_ID.into();

    fx.pipeline.enqueue(notice).await.expect("enqueue");
    fx.pipeline.enqueue(payload(2)).await.expect("enqueue");

    assert!(
        wait_until(Duration::from_secs(2), || async { fx.sink.delivered().len() == 1 }).await,
        "regular payload delivered"
    );
    assert_eq!(fx.sink.message_ids(), vec![2]);
    let skipped = fx.output.notifications("sync");
    assert!(skipped
        .iter()
        .any(|n| n["saved"] == false && n["message"] == format!("Skip: excluded peer {SYSTEM_NOTICES_PEER_ID}")));
    fx.pipeline.shutdown().await;
}

#[tokio::test]
async fn reserved_peer_replayed_from_overflow_is_skipped() {
    let fx = fixture(Some(RecordingSink::open()), 10, 1).await;
    let mut notice = payload(1);
    notice.peer_id = SYSTEM_NOTICES_PEER_ID.into();
    fx.store.append(&notice).await.expect("append");
    fx.store.append(&payload(2)).await.expect("append");

    assert_eq!(fx.pipeline.resume_pending().await.expect("resume"), 2);

    assert!(
        wait_until(Duration::from_secs(2), || async { fx.sink.delivered().len() == 1 }).await,
        "regular payload delivered"
    );
    assert!(
        wait_until(Duration::from_secs(2), || async {
            fx.store.count().await.expect("count") == 0
        })
        .await,
        "overflow drained"
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fx.sink.message_ids(), vec![2]);
    assert!(fx
        .output
        .messages("sync")
        .contains(&format!("Skip: excluded peer {SYSTEM_NOTICES_PEER_ID}")));
    fx.pipeline.shutdown().await;
}

#[tokio::test]
async fn pending_entries_from_previous_run_resume_at_startup() {
    let fx = fixture(Some(RecordingSink::open()), 10, 2).await;
    fx.store.append(&payload(7)).await.expect("append");
    fx.store.append(&payload(8)).await.expect("append");

    let pending = fx.pipeline.resume_pending().await.expect("resume");

    assert_eq!(pending, 2);
    assert!(fx.pipeline.is_running());
    assert!(
        wait_until(Duration::from_secs(2), || async { fx.sink.delivered().len() == 2 }).await,
        "leftovers delivered without a new event"
    );
    assert_eq!(fx.sink.message_ids(), vec![7, 8]);
    fx.pipeline.shutdown().await;
}

#[tokio::test]
async fn resume_with_empty_store_stays_idle() {
    let fx = fixture(Some(RecordingSink::open()), 10, 2).await;

    assert_eq!(fx.pipeline.resume_pending().await.expect("resume"), 0);
    assert!(!fx.pipeline.is_running());
}

#[tokio::test]
async fn corrupt_overflow_entry_is_reported_and_removed() {
    let fx = fixture(Some(RecordingSink::open()), 10, 1).await;
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("0001.json"), r#"{"not":"a payload"}"#).expect("write");
    fx.store
        .migrate_legacy_files(dir.path())
        .await
        .expect("migrate");
    fx.store.append(&payload(3)).await.expect("append");

    fx.pipeline.resume_pending().await.expect("resume");

    assert!(
        wait_until(Duration::from_secs(2), || async { fx.sink.delivered().len() == 1 }).await,
        "valid entry still delivered"
    );
    assert!(fx.output.has_message("error", "corrupt"));
    assert!(
        wait_until(Duration::from_secs(2), || async {
            fx.store.count().await.expect("count") == 0
        })
        .await
    );
    fx.pipeline.shutdown().await;
}

#[tokio::test]
async fn shutdown_delivers_queued_items_then_stops_workers() {
    let fx = fixture(Some(RecordingSink::open()), 50, 2).await;
    for id in 1..=10 {
        fx.pipeline.enqueue(payload(id)).await.expect("enqueue");
    }

    fx.pipeline.shutdown().await;

    assert_eq!(fx.sink.message_ids(), (1..=10).collect::<Vec<_>>());
}

#[tokio::test]
async fn enqueue_after_shutdown_is_kept_for_next_run() {
    let fx = fixture(Some(RecordingSink::open()), 10, 1).await;
    fx.pipeline.enqueue(payload(1)).await.expect("enqueue");
    fx.pipeline.shutdown().await;

    let outcome = fx.pipeline.enqueue(payload(2)).await.expect("enqueue");

    assert_eq!(outcome, EnqueueOutcome::Overflowed);
    assert_eq!(fx.store.count().await.expect("count"), 1);
}
