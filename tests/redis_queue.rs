//! Integration tests for the Redis-backed priority queue.
//!
//! These tests require a running Redis instance.
//! Run with: REDIS_URL=redis://localhost:6379 cargo test --test redis_queue -- --ignored

use ai_dispatch::queue::item::Priority;
use ai_dispatch::queue::priority_queue::PriorityQueue;

fn redis_url() -> String {
    std::env::var("REDIS_URL")
        .expect("REDIS_URL environment variable must be set for Redis integration tests")
}

/// Fresh namespace per test so runs never interfere with each other.
fn test_queue() -> PriorityQueue {
    PriorityQueue::new(
        redis_url(),
        format!("ai-dispatch-test-{}", uuid::Uuid::new_v4()),
    )
}

#[tokio::test]
#[ignore] // Run with: cargo test --test redis_queue -- --ignored
async fn test_priority_and_fifo_roundtrip() {
    let queue = test_queue();
    queue.connect().await.expect("Redis should be reachable");

    for (id, priority) in [
        ("a", Priority::Normal),
        ("b", Priority::High),
        ("c", Priority::Normal),
        ("d", Priority::Low),
        ("e", Priority::High),
    ] {
        queue
            .enqueue(id, serde_json::json!({"n": id}), priority)
            .await
            .expect("enqueue should succeed");
    }

    let mut order = Vec::new();
    while let Some(item) = queue.dequeue().await.expect("dequeue should succeed") {
        // Payloads round-trip through Redis untouched.
        assert_eq!(item.data["n"], item.id);
        order.push(item.id);
    }

    assert_eq!(order, vec!["b", "e", "a", "c", "d"]);
    assert!(queue.is_empty().await.expect("depth should be readable"));

    queue.disconnect().await;
}

#[tokio::test]
#[ignore]
async fn test_depth_peek_and_metrics() {
    let queue = test_queue();
    queue.connect().await.expect("Redis should be reachable");

    queue
        .enqueue("one", serde_json::json!({}), Priority::High)
        .await
        .expect("enqueue should succeed");
    queue
        .enqueue("two", serde_json::json!({}), Priority::Low)
        .await
        .expect("enqueue should succeed");

    assert_eq!(queue.depth(Priority::High).await.unwrap(), 1);
    assert_eq!(queue.depth(Priority::Normal).await.unwrap(), 0);
    assert_eq!(queue.depth(Priority::Low).await.unwrap(), 1);

    let metrics = queue.metrics().await.unwrap();
    assert_eq!(metrics.total_depth, 2);

    // Peek is non-destructive and honors priority.
    let peeked = queue.peek().await.unwrap().expect("item should be visible");
    assert_eq!(peeked.id, "one");
    assert_eq!(queue.total_depth().await.unwrap(), 2);

    // Drain so the namespace leaves nothing behind.
    while queue.dequeue().await.unwrap().is_some() {}
    queue.disconnect().await;
}

#[tokio::test]
#[ignore]
async fn test_disconnect_fails_fast() {
    let queue = test_queue();
    queue.connect().await.expect("Redis should be reachable");
    queue.disconnect().await;

    let result = queue
        .enqueue("late", serde_json::json!({}), Priority::Normal)
        .await;
    assert!(result.is_err());
}
