//! Integration tests for the PostgreSQL message queue's visibility and
//! lease-checked acknowledgement.
//!
//! Requires a running Postgres instance.
//! Run with: `cargo test --test postgres_queue --features postgres -- --ignored`

#![cfg(feature = "postgres")]

use std::time::Duration;

use pepflow::persistence::PostgresMessageQueue;
use pepflow::{MessageQueue, QueueName};
use sqlx::PgPool;

async fn connect() -> PostgresMessageQueue {
    let pool = PgPool::connect(&std::env::var("DATABASE_URL").expect("DATABASE_URL required"))
        .await
        .expect("connect");
    let queue = PostgresMessageQueue::new(pool);
    queue.ensure_schema().await.expect("schema");
    queue
}

async fn expire(queue: &PostgresMessageQueue, body: &str) {
    sqlx::query("UPDATE pepflow_messages SET visible_at = NOW() - INTERVAL '1 second' WHERE body = $1")
        .bind(body)
        .execute(queue.pool())
        .await
        .expect("expire");
}

async fn cleanup(queue: &PostgresMessageQueue, body: &str) {
    sqlx::query("DELETE FROM pepflow_messages WHERE body = $1")
        .bind(body)
        .execute(queue.pool())
        .await
        .ok();
}

/// A fetched message is hidden for its time-to-run, then delivered again
/// with a new lease; the stale lease cannot remove it.
#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn unacked_message_is_redelivered_and_stale_ack_is_ignored() {
    let queue = connect().await;
    let body = format!(r#"{{"type":"job-unpacked","job_id":"{}"}}"#, uuid::Uuid::new_v4());

    queue
        .put(QueueName::Head, body.clone(), 0, Duration::from_secs(60))
        .await
        .expect("put");

    let first = queue.get(QueueName::Head).await.expect("get").expect("message");
    assert_eq!(first.body, body);
    assert_eq!(first.deliveries, 1);

    expire(&queue, &body).await;
    let second = queue.get(QueueName::Head).await.expect("get").expect("redelivery");
    assert_eq!(second.message_id, first.message_id);
    assert_eq!(second.deliveries, 2);
    assert_ne!(second.lease_id, first.lease_id);

    queue.ack(&first).await.expect("stale ack");
    expire(&queue, &body).await;
    let third = queue.get(QueueName::Head).await.expect("get").expect("still queued");
    queue.ack(&third).await.expect("ack");

    expire(&queue, &body).await;
    assert!(queue.get(QueueName::Head).await.expect("get").is_none());
    cleanup(&queue, &body).await;
}

/// Lower priority values are fetched first.
#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn most_urgent_node_message_is_fetched_first() {
    let queue = connect().await;
    let tag = uuid::Uuid::new_v4();
    let late = format!("late-{tag}");
    let urgent = format!("urgent-{tag}");

    queue
        .put(QueueName::Node, late.clone(), 1_000_000, Duration::from_secs(60))
        .await
        .expect("put late");
    queue
        .put(QueueName::Node, urgent.clone(), 0, Duration::from_secs(60))
        .await
        .expect("put urgent");

    let delivery = queue.get(QueueName::Node).await.expect("get").expect("message");
    assert_eq!(delivery.body, urgent);
    queue.ack(&delivery).await.expect("ack");

    cleanup(&queue, &late).await;
    cleanup(&queue, &urgent).await;
}
