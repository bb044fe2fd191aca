//! Integration tests against a real Redis instance.
//!
//! Set `REDIS_URL` to run these; they're skipped otherwise so `cargo test`
//! stays usable without a Redis instance on hand.

use queueforge::config::RedisConfig;
use queueforge::{create_pool, EventBus, JobOptions, JobQueue, JobStatus, RedisJobQueue};
use std::sync::Arc;
use std::time::Duration;

async fn test_queue() -> Option<(RedisJobQueue, String)> {
    let url = std::env::var("REDIS_URL").ok()?;
    let config = RedisConfig {
        url,
        ..RedisConfig::default()
    };
    let pool = create_pool(&config).await.expect("failed to create pool");
    let prefix = format!("queueforge-test-{}", uuid::Uuid::new_v4());
    let events = Arc::new(EventBus::new(16));
    let queue = RedisJobQueue::new(pool, prefix, 4, events);
    queue.health_check().await.expect("redis not reachable");
    Some((queue, "emails".to_string()))
}

#[tokio::test]
async fn add_and_fetch_roundtrips_payload() {
    let Some((queue, q)) = test_queue().await else {
        eprintln!("skipping: REDIS_URL not set");
        return;
    };

    let id = queue
        .add(&q, r#"{"to":"a@example.com"}"#, JobOptions::default())
        .await
        .expect("add failed");

    let info = queue
        .get_job(&q, id.as_str())
        .await
        .expect("get_job failed")
        .expect("job missing");

    assert_eq!(info.id, id);
    assert_eq!(info.status, JobStatus::Waiting);
}

#[tokio::test]
async fn dequeue_moves_job_to_active() {
    let Some((queue, q)) = test_queue().await else {
        eprintln!("skipping: REDIS_URL not set");
        return;
    };

    queue
        .add(&q, "payload", JobOptions::default())
        .await
        .expect("add failed");

    let dequeued = queue.dequeue(&q).await.expect("dequeue failed");
    assert!(dequeued.is_some());
}

#[tokio::test]
async fn delayed_job_is_not_immediately_dequeued() {
    let Some((queue, q)) = test_queue().await else {
        eprintln!("skipping: REDIS_URL not set");
        return;
    };

    queue
        .add(
            &q,
            "payload",
            JobOptions {
                delay: Duration::from_secs(60).as_millis() as u64,
                ..Default::default()
            },
        )
        .await
        .expect("add failed");

    let dequeued = queue.dequeue(&q).await.expect("dequeue failed");
    assert!(dequeued.is_none());
}

#[tokio::test]
async fn pause_blocks_new_dequeues() {
    let Some((queue, q)) = test_queue().await else {
        eprintln!("skipping: REDIS_URL not set");
        return;
    };

    queue
        .add(&q, "payload", JobOptions::default())
        .await
        .expect("add failed");
    queue.pause(&q).await.expect("pause failed");
    assert!(queue.is_paused(&q).await.expect("is_paused failed"));

    queue.resume(&q).await.expect("resume failed");
    let dequeued = queue.dequeue(&q).await.expect("dequeue failed");
    assert!(dequeued.is_some());
}

#[tokio::test]
async fn job_counts_reflect_queue_state() {
    let Some((queue, q)) = test_queue().await else {
        eprintln!("skipping: REDIS_URL not set");
        return;
    };

    for _ in 0..3 {
        queue
            .add(&q, "payload", JobOptions::default())
            .await
            .expect("add failed");
    }

    let counts = queue.get_job_counts(&q).await.expect("get_job_counts failed");
    assert_eq!(counts.waiting, 3);
    assert_eq!(counts.active, 0);
}

#[tokio::test]
async fn remove_job_clears_it_from_every_list() {
    let Some((queue, q)) = test_queue().await else {
        eprintln!("skipping: REDIS_URL not set");
        return;
    };

    let id = queue
        .add(&q, "payload", JobOptions::default())
        .await
        .expect("add failed");

    assert!(queue.remove_job(&q, id.as_str()).await.expect("remove failed"));
    assert!(queue
        .get_job(&q, id.as_str())
        .await
        .expect("get_job failed")
        .is_none());
}
