//! Producer behaviour against the in-memory log.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tributary_jobs::{AddOptions, CursorConfig, InMemoryLog, LogService, Queue, QueueOptions};

async fn queue_with_window(window: Duration) -> (Queue, InMemoryLog) {
    let log = InMemoryLog::new();
    let queue = Queue::new(
        Arc::new(log.clone()),
        QueueOptions::new("test").deduplicate_window(window),
    );
    queue.setup().await.unwrap();
    (queue, log)
}

#[tokio::test]
async fn test_same_id_is_duplicate_with_same_sequence() {
    let (queue, log) = queue_with_window(Duration::from_millis(2_000)).await;

    let first = queue
        .add("job1", &json!({ "n": 1 }), AddOptions::with_id("X"))
        .await
        .unwrap();
    let second = queue
        .add("job1", &json!({ "n": 1 }), AddOptions::with_id("X"))
        .await
        .unwrap();

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(first.sequence, second.sequence);
    assert_eq!(log.message_count("test"), 1);
}

#[tokio::test]
async fn test_different_ids_increment_sequence() {
    let (queue, _log) = queue_with_window(Duration::from_millis(2_000)).await;

    let a = queue
        .add("job1", &json!({}), AddOptions::with_id("X"))
        .await
        .unwrap();
    let b = queue
        .add("job1", &json!({}), AddOptions::with_id("Y"))
        .await
        .unwrap();

    assert!(!b.duplicate);
    assert_eq!(b.sequence, a.sequence + 1);
}

#[tokio::test]
async fn test_without_id_nothing_is_deduplicated() {
    let (queue, log) = queue_with_window(Duration::from_millis(2_000)).await;

    for _ in 0..3 {
        let ack = queue.add("job1", &json!({}), AddOptions::default()).await.unwrap();
        assert!(!ack.duplicate);
    }
    assert_eq!(log.message_count("test"), 3);
}

#[tokio::test]
async fn test_same_id_after_window_is_stored_again() {
    let (queue, _log) = queue_with_window(Duration::from_millis(50)).await;

    let first = queue
        .add("job1", &json!({}), AddOptions::with_id("X"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let again = queue
        .add("job1", &json!({}), AddOptions::with_id("X"))
        .await
        .unwrap();

    assert!(!again.duplicate);
    assert!(again.sequence > first.sequence);
}

#[tokio::test]
async fn test_headers_and_payload_reach_the_log() {
    let log = InMemoryLog::new();
    let queue = Queue::new(Arc::new(log.clone()), QueueOptions::new("test"));
    queue.setup().await.unwrap();
    queue
        .add(
            "greet",
            &json!({ "name": "ada" }),
            AddOptions::default().header("trace-id", "t-1"),
        )
        .await
        .unwrap();

    log.ensure_cursor(&CursorConfig {
        log: "test".into(),
        name: "reader".into(),
        filter_subject: "test.*".into(),
    })
    .await
    .unwrap();
    let source = log.open_cursor("test", "reader", "r1").await.unwrap();
    let batch = source.fetch(1).await.unwrap();

    let delivery = batch[0].delivery();
    assert_eq!(delivery.subject, "test.greet");
    assert_eq!(delivery.job_name(), "greet");
    assert_eq!(delivery.headers.get("trace-id").map(String::as_str), Some("t-1"));
    let body: serde_json::Value = delivery.json().unwrap();
    assert_eq!(body["name"], "ada");
}
