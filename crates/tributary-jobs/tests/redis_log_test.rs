//! Redis Streams log integration tests.
//!
//! Run with `cargo test -- --ignored` on a machine with Docker.

mod common;

use common::{wait_until, within, TestRedis, FAST_POLL};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tributary_jobs::{
    processor, AddOptions, CursorConfig, JobError, LogConfig, LogService, Queue, QueueOptions,
    Worker, WorkerOptions,
};

fn cursor(log: &str, name: &str, filter: &str) -> CursorConfig {
    CursorConfig {
        log: log.to_string(),
        name: name.to_string(),
        filter_subject: filter.to_string(),
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_publish_deduplicates_within_window() {
    let redis = TestRedis::new().await;
    let log = redis.log().await;
    let queue = Queue::new(Arc::new(log.clone()), QueueOptions::new("dedup"));
    queue.setup().await.unwrap();

    let first = queue
        .add("job1", &json!({ "n": 1 }), AddOptions::with_id("X"))
        .await
        .unwrap();
    let second = queue
        .add("job1", &json!({ "n": 1 }), AddOptions::with_id("X"))
        .await
        .unwrap();
    let third = queue
        .add("job1", &json!({ "n": 2 }), AddOptions::with_id("Y"))
        .await
        .unwrap();

    assert_eq!(first.sequence, 1);
    assert!(second.duplicate);
    assert_eq!(second.sequence, first.sequence);
    assert!(!third.duplicate);
    assert_eq!(third.sequence, 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_publish_errors() {
    let redis = TestRedis::new().await;
    let log = redis.log().await;

    let err = log
        .publish("missing", "missing.a", Vec::new(), None, &Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::LogNotFound(_)));

    log.ensure_log(&LogConfig::new("bound", "bound.*", Duration::from_secs(2)))
        .await
        .unwrap();
    let err = log
        .publish("bound", "other.a", Vec::new(), None, &Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::SubjectNotBound { .. }));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_create_log_and_cursor_are_idempotent() {
    let redis = TestRedis::new().await;
    let log = redis.log().await;
    let config = LogConfig::new("once", "once.*", Duration::from_secs(2));

    log.create_log(&config).await.unwrap();
    assert!(log.create_log(&config).await.unwrap_err().is_already_exists());

    log.ensure_cursor(&cursor("once", "reader", "once.*")).await.unwrap();
    log.ensure_cursor(&cursor("once", "reader", "once.*")).await.unwrap();

    let err = log.open_cursor("once", "nobody", "c1").await.err().unwrap();
    assert!(matches!(err, JobError::CursorNotFound { .. }));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_fetch_acknowledge_terminate_and_redelivery() {
    let redis = TestRedis::new().await;
    let log = redis.log().await;
    log.ensure_log(&LogConfig::new("flow", "flow.*", Duration::from_secs(2)))
        .await
        .unwrap();
    log.ensure_cursor(&cursor("flow", "flow", "flow.*")).await.unwrap();
    for name in ["a", "b", "c"] {
        log.publish("flow", &format!("flow.{name}"), b"{}".to_vec(), None, &Default::default())
            .await
            .unwrap();
    }

    let source = log.open_cursor("flow", "flow", "c1").await.unwrap();
    let mut batch = source.fetch(3).await.unwrap();
    assert_eq!(batch.len(), 3);
    let sequences: Vec<u64> = batch.iter().map(|h| h.delivery().meta.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);

    let c = batch.pop().unwrap();
    let b = batch.pop().unwrap();
    let a = batch.pop().unwrap();
    a.acknowledge().await.unwrap();
    b.terminate().await.unwrap();
    drop(c);

    // `c` stays pending until the ack wait (200 ms in tests) runs out.
    assert!(source.fetch(3).await.unwrap().is_empty());
    tokio::time::sleep(Duration::from_millis(300)).await;

    let other = log.open_cursor("flow", "flow", "c2").await.unwrap();
    let redelivered = other.fetch(3).await.unwrap();
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].delivery().meta.sequence, 3);
    assert_eq!(redelivered[0].delivery().meta.delivery_count, 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_cursor_filter_skips_other_subjects() {
    let redis = TestRedis::new().await;
    let log = redis.log().await;
    log.ensure_log(&LogConfig::new("mail", "mail.*", Duration::from_secs(2)))
        .await
        .unwrap();
    log.ensure_cursor(&cursor("mail", "welcome", "mail.welcome"))
        .await
        .unwrap();
    log.publish("mail", "mail.reset", b"{}".to_vec(), None, &Default::default())
        .await
        .unwrap();
    log.publish("mail", "mail.welcome", b"{}".to_vec(), None, &Default::default())
        .await
        .unwrap();

    let source = log.open_cursor("mail", "welcome", "c1").await.unwrap();
    let batch = source.fetch(5).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].delivery().job_name(), "welcome");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_worker_end_to_end() {
    let redis = TestRedis::new().await;
    let log: Arc<dyn LogService> = Arc::new(redis.log().await);

    let queue = Queue::new(Arc::clone(&log), QueueOptions::new("e2e"));
    queue.setup().await.unwrap();
    for n in 0..4 {
        queue
            .add("count", &json!({ "n": n }), AddOptions::with_generated_id())
            .await
            .unwrap();
    }

    let worker = Worker::new(
        Arc::clone(&log),
        WorkerOptions::new("e2e").concurrency(2).poll_interval(FAST_POLL),
        processor(|delivery| async move {
            let body: serde_json::Value = delivery.json()?;
            if body["n"] == 3 {
                Err(JobError::processor("n is 3"))
            } else {
                Ok(())
            }
        }),
    );
    worker.setup().await.unwrap();
    worker.start().unwrap();

    wait_until(Duration::from_secs(10), || {
        let stats = worker.stats();
        stats.acknowledged == 3 && stats.terminated == 1
    })
    .await;
    within(Duration::from_secs(5), worker.stop()).await;
}
