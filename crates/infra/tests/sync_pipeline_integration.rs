//! End-to-end sync runs against the SQLite message store and time-series
//! store, with an in-memory relational side.

mod support;

use std::sync::Arc;
use std::time::Duration;

use dualsync_core::{MessageStore, TimeSeriesStore};
use dualsync_domain::{
    DualSyncError, OperationType, RecordIdentifier, StatusUpdate, SyncDirection, SyncMessage,
    SyncStatus,
};
use dualsync_infra::observability::metrics::WorkerMetrics;
use dualsync_infra::sync::{SyncWorker, SyncWorkerConfig};
use serde_json::json;
use support::{make_message, record_key, Pipeline};

#[tokio::test(flavor = "multi_thread")]
async fn timeseries_update_lands_in_relational_table() {
    let pipeline = Pipeline::new(3, 0);
    let payload = json!({"symbol": "AAA", "close": 101.5});
    let message =
        make_message(SyncDirection::TimeseriesToRelational, OperationType::Update, "AAA", payload.clone());
    pipeline.messages.enqueue(&message).await.unwrap();

    let summary = pipeline.processor("worker-1").process_pending_batch().await;
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.succeeded, 1);

    assert_eq!(pipeline.relational.row("quotes", &record_key("AAA")).await, Some(payload));

    let stored = pipeline.messages.get_message_by_id(&message.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SyncStatus::Success);
    assert_eq!(stored.processed_by.as_deref(), Some("worker-1"));
    assert_eq!(stored.rows_affected, Some(1));
    assert!(stored.sync_latency_ms.unwrap() >= 0);
    assert!(stored.processing_duration_ms.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn relational_insert_appends_timeseries_version() {
    let pipeline = Pipeline::new(3, 0);
    let message = make_message(
        SyncDirection::RelationalToTimeseries,
        OperationType::Insert,
        "BBB",
        json!({"close": 7}),
    );
    pipeline.messages.enqueue(&message).await.unwrap();

    pipeline.processor("worker-1").process_pending_batch().await;

    assert_eq!(
        pipeline.timeseries.read("quotes_ts", &record_key("BBB")).await.unwrap(),
        Some(json!({"close": 7}))
    );
    assert_eq!(pipeline.timeseries.list_versions("quotes_ts", &record_key("BBB")).await.unwrap(), vec![1]);
}

#[tokio::test(flavor = "multi_thread")]
async fn bidirectional_delete_clears_both_sides() {
    let pipeline = Pipeline::new(3, 0);
    let key = record_key("CCC");
    pipeline.timeseries.write("quotes_ts", &key, &json!({"close": 1})).await.unwrap();
    pipeline.timeseries.write("quotes_ts", &key, &json!({"close": 2})).await.unwrap();
    pipeline.relational.rows.lock().await.insert(("quotes".to_string(), key.clone()), json!({"close": 2}));

    let message =
        make_message(SyncDirection::Bidirectional, OperationType::Delete, "CCC", json!(null));
    pipeline.messages.enqueue(&message).await.unwrap();
    pipeline.processor("worker-1").process_pending_batch().await;

    let stored = pipeline.messages.get_message_by_id(&message.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SyncStatus::Success);
    // One relational row plus two time-series versions.
    assert_eq!(stored.rows_affected, Some(3));
    assert!(pipeline.timeseries.read("quotes_ts", &key).await.unwrap().is_none());
    assert!(pipeline.relational.row("quotes", &key).await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn bulk_insert_with_invalid_elements_is_partial_success() {
    let pipeline = Pipeline::new(3, 0);
    let message = SyncMessage::new(
        SyncDirection::TimeseriesToRelational,
        OperationType::BulkInsert,
        "quotes_ts",
        "quotes",
        RecordIdentifier::new().with("kind", "quote").with("granularity", "1d"),
        json!([
            {"symbol": "AAA", "close": 1},
            {"close": 2},
            {"symbol": "BBB", "close": 3}
        ]),
    );
    pipeline.messages.enqueue(&message).await.unwrap();

    let summary = pipeline.processor("worker-1").process_pending_batch().await;
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.partial, 1);

    let stored = pipeline.messages.get_message_by_id(&message.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SyncStatus::PartialSuccess);
    assert_eq!(stored.rows_affected, Some(2));
    assert!(pipeline.relational.row("quotes", &record_key("AAA")).await.is_some());
    assert!(pipeline.relational.row("quotes", &record_key("BBB")).await.is_some());

    // Terminal: neither batch picks it up again.
    let processor = pipeline.processor("worker-1");
    assert_eq!(processor.process_pending_batch().await.processed, 0);
    assert_eq!(processor.process_retryable_batch().await.processed, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_failures_escalate_to_dead_letter() {
    let pipeline = Pipeline::new(1, 0);
    pipeline.relational.set_failing(true);
    let message = make_message(
        SyncDirection::TimeseriesToRelational,
        OperationType::Insert,
        "DDD",
        json!({"close": 9}),
    );
    pipeline.messages.enqueue(&message).await.unwrap();
    let processor = pipeline.processor("worker-1");

    let first = processor.process_pending_batch().await;
    assert_eq!(first.failed, 1);
    let stored = pipeline.messages.get_message_by_id(&message.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SyncStatus::Failed);
    assert_eq!(stored.retry_count, 1);
    assert!(stored.error_message.unwrap().contains("relational store write failed"));
    let details = stored.error_details.unwrap();
    assert_eq!(details["kind"], "store");
    assert_eq!(details["worker_id"], "worker-1");

    let retry = processor.process_retryable_batch().await;
    assert_eq!(retry.processed, 1);
    assert_eq!(retry.failed, 1);
    assert_eq!(retry.moved_to_dlq, 1);

    let stored = pipeline.messages.get_message_by_id(&message.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SyncStatus::DeadLetter);
    assert_eq!(stored.retry_count, 2);
    assert_eq!(processor.process_retryable_batch().await.processed, 0);

    let counts = pipeline.messages.status_counts().await.unwrap();
    assert_eq!(counts.dead_letter, 1);
    assert_eq!(counts.total(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_pass_recovers_after_store_comes_back() {
    let pipeline = Pipeline::new(3, 0);
    pipeline.relational.set_failing(true);
    let message = make_message(
        SyncDirection::TimeseriesToRelational,
        OperationType::Update,
        "EEE",
        json!({"close": 4}),
    );
    pipeline.messages.enqueue(&message).await.unwrap();
    let processor = pipeline.processor("worker-1");

    assert_eq!(processor.process_pending_batch().await.failed, 1);
    pipeline.relational.set_failing(false);

    let retry = processor.process_retryable_batch().await;
    assert_eq!(retry.succeeded, 1);
    assert_eq!(retry.moved_to_dlq, 0);

    let stored = pipeline.messages.get_message_by_id(&message.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SyncStatus::Success);
    assert_eq!(stored.retry_count, 1);
    assert!(stored.error_message.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_direction_fails_without_touching_stores() {
    let pipeline = Pipeline::new(3, 0);
    let mut message = make_message(
        SyncDirection::TimeseriesToRelational,
        OperationType::Insert,
        "FFF",
        json!({"close": 1}),
    );
    message.sync_direction = "sideways".to_string();
    pipeline.messages.enqueue(&message).await.unwrap();

    pipeline.processor("worker-1").process_pending_batch().await;

    let stored = pipeline.messages.get_message_by_id(&message.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SyncStatus::Failed);
    assert_eq!(stored.error_details.unwrap()["kind"], "unsupported_category");
    assert!(pipeline.relational.rows.lock().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_processors_handle_each_message_once() {
    let pipeline = Pipeline::new(3, 0);
    for i in 0..20 {
        let message = make_message(
            SyncDirection::TimeseriesToRelational,
            OperationType::Insert,
            &format!("SYM{i:02}"),
            json!({"close": i}),
        );
        pipeline.messages.enqueue(&message).await.unwrap();
    }

    let a = pipeline.processor("worker-a");
    let b = pipeline.processor("worker-b");
    let (first, second) = tokio::join!(a.process_pending_batch(), b.process_pending_batch());

    assert_eq!(first.succeeded + second.succeeded, 20);
    assert_eq!(first.failed + second.failed, 0);
    assert_eq!(pipeline.relational.rows.lock().await.len(), 20);

    let counts = pipeline.messages.status_counts().await.unwrap();
    assert_eq!(counts.success, 20);
    assert_eq!(counts.in_progress, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_run_once_drives_both_passes() {
    let pipeline = Pipeline::new(3, 0);
    let message = make_message(
        SyncDirection::RelationalToTimeseries,
        OperationType::Update,
        "GGG",
        json!({"close": 5}),
    );
    pipeline.messages.enqueue(&message).await.unwrap();

    let config = SyncWorkerConfig {
        poll_interval: Duration::from_millis(20),
        retry_interval: Duration::from_millis(20),
        processing_timeout: Duration::from_secs(10),
        join_timeout: Duration::from_secs(2),
        stale_claim_after: Duration::from_secs(60),
    };
    let worker =
        SyncWorker::new(pipeline.processor("worker-1"), config, Arc::new(WorkerMetrics::new()));

    let (pending, retried) = worker.run_once().await.unwrap();
    assert_eq!(pending.succeeded, 1);
    assert_eq!(retried.processed, 0);

    let snapshot = worker.metrics().snapshot();
    assert_eq!(snapshot.pending_batches, 1);
    assert_eq!(snapshot.retry_batches, 1);
    assert_eq!(snapshot.messages_succeeded, 1);
    assert!(snapshot.p50_batch_ms.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_loop_syncs_until_stopped() {
    let pipeline = Pipeline::new(3, 0);
    for symbol in ["HHH", "III"] {
        let message = make_message(
            SyncDirection::TimeseriesToRelational,
            OperationType::Insert,
            symbol,
            json!({"close": 1}),
        );
        pipeline.messages.enqueue(&message).await.unwrap();
    }

    let config = SyncWorkerConfig {
        poll_interval: Duration::from_millis(20),
        retry_interval: Duration::from_millis(50),
        processing_timeout: Duration::from_secs(10),
        join_timeout: Duration::from_secs(5),
        stale_claim_after: Duration::from_secs(60),
    };
    let mut worker =
        SyncWorker::new(pipeline.processor("worker-1"), config, Arc::new(WorkerMetrics::new()));
    worker.start().await.unwrap();

    for _ in 0..250 {
        if pipeline.messages.status_counts().await.unwrap().success == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    worker.stop().await.unwrap();

    assert_eq!(pipeline.messages.status_counts().await.unwrap().success, 2);
    assert_eq!(worker.processor().stats().total_processed, 2);
    assert!(!worker.processor().stats().running);
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_pass_recovers_claim_abandoned_by_dead_worker() {
    let pipeline = Pipeline::new(3, 0);
    let message = make_message(
        SyncDirection::TimeseriesToRelational,
        OperationType::Insert,
        "JJJ",
        json!({"close": 7}),
    );
    pipeline.messages.enqueue(&message).await.unwrap();
    pipeline
        .messages
        .update_message_status(&message.id, &StatusUpdate::in_progress("worker-dead"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let config = SyncWorkerConfig { stale_claim_after: Duration::ZERO, ..SyncWorkerConfig::default() };
    let worker =
        SyncWorker::new(pipeline.processor("worker-1"), config, Arc::new(WorkerMetrics::new()));

    let (pending, _) = worker.run_once().await.unwrap();
    assert_eq!(pending.processed, 0);
    assert_eq!(worker.metrics().snapshot().claims_released, 1);

    let (pending, _) = worker.run_once().await.unwrap();
    assert_eq!(pending.succeeded, 1);
    let stored = pipeline.messages.get_message_by_id(&message.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SyncStatus::Success);
    assert_eq!(stored.processed_by.as_deref(), Some("worker-1"));

    // The dead worker's late write cannot overwrite the new owner's result.
    let late = pipeline
        .messages
        .update_message_status(&message.id, &StatusUpdate::failed("worker-dead", "late"))
        .await
        .unwrap_err();
    assert!(matches!(late, DualSyncError::Conflict(_)));
}
