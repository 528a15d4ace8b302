//! Integration tests for the bounded work queue.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use scopework::Error;
use scopework::model::{WorkId, WorkItem};
use scopework::queue::WorkQueue;
use tokio_util::sync::CancellationToken;

fn noop_item() -> WorkItem {
    WorkItem::new(|_scope, _token| async { Ok(()) }, None)
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

#[test]
fn zero_capacity_is_rejected() {
    let err = WorkQueue::new(0).unwrap_err();
    assert!(matches!(err, Error::InvalidCapacity(0)));
}

#[test]
fn new_queue_is_empty() {
    let queue = WorkQueue::new(4).unwrap();
    assert!(queue.is_empty());
    assert_eq!(queue.capacity(), 4);
    assert!(!queue.is_closed());
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dequeue_order_matches_enqueue_order() {
    let queue = WorkQueue::new(16).unwrap();
    let token = CancellationToken::new();

    let mut ids = Vec::new();
    for _ in 0..10 {
        let item = noop_item();
        ids.push(item.id());
        queue.enqueue(item).await.unwrap();
    }
    assert_eq!(queue.len(), 10);

    let mut out = Vec::new();
    for _ in 0..10 {
        out.push(queue.dequeue(&token).await.unwrap().id());
    }
    assert_eq!(out, ids);
    assert!(queue.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_and_consumers_lose_and_duplicate_nothing() {
    let queue = Arc::new(WorkQueue::new(8).unwrap());
    let token = CancellationToken::new();

    let mut producers = Vec::new();
    for _ in 0..4 {
        let queue = Arc::clone(&queue);
        producers.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            for _ in 0..50 {
                let item = noop_item();
                ids.push(item.id());
                queue.enqueue(item).await.unwrap();
            }
            ids
        }));
    }

    let mut consumers = Vec::new();
    for _ in 0..3 {
        let queue = Arc::clone(&queue);
        let token = token.clone();
        consumers.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            while let Ok(item) = queue.dequeue(&token).await {
                ids.push(item.id());
            }
            ids
        }));
    }

    let mut submitted: HashSet<WorkId> = HashSet::new();
    for p in producers {
        submitted.extend(p.await.unwrap());
    }

    // Wait for the consumers to drain, then stop them.
    tokio::time::timeout(Duration::from_secs(5), async {
        while !queue.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queue never drained");
    token.cancel();

    let mut received = Vec::new();
    for c in consumers {
        received.extend(c.await.unwrap());
    }
    assert_eq!(received.len(), 200);
    let unique: HashSet<WorkId> = received.into_iter().collect();
    assert_eq!(unique, submitted);
}

// ---------------------------------------------------------------------------
// Backpressure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enqueue_blocks_at_capacity_until_a_dequeue() {
    let queue = Arc::new(WorkQueue::new(2).unwrap());
    let token = CancellationToken::new();

    queue.enqueue(noop_item()).await.unwrap();
    queue.enqueue(noop_item()).await.unwrap();

    let third = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.enqueue(noop_item()).await })
    };

    // Still blocked after giving it time to run.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!third.is_finished(), "third enqueue should block on a full queue");
    assert_eq!(queue.len(), 2);

    queue.dequeue(&token).await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), third)
        .await
        .expect("third enqueue never completed")
        .unwrap()
        .unwrap();
    assert_eq!(queue.len(), 2);
}

#[tokio::test]
async fn try_enqueue_reports_full() {
    let queue = WorkQueue::new(1).unwrap();
    queue.try_enqueue(noop_item()).unwrap();
    let err = queue.try_enqueue(noop_item()).unwrap_err();
    assert!(matches!(err, Error::QueueFull));
}

// ---------------------------------------------------------------------------
// Cancellation and close
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelled_dequeue_signals_cancellation() {
    let queue = Arc::new(WorkQueue::new(2).unwrap());
    let token = CancellationToken::new();

    let waiter = {
        let queue = Arc::clone(&queue);
        let token = token.clone();
        tokio::spawn(async move { queue.dequeue(&token).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("dequeue did not observe cancellation")
        .unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test]
async fn cancelled_wait_does_not_lose_items() {
    let queue = WorkQueue::new(2).unwrap();
    let cancelled = CancellationToken::new();
    cancelled.cancel();

    let item = noop_item();
    let id = item.id();
    queue.enqueue(item).await.unwrap();

    assert!(matches!(queue.dequeue(&cancelled).await, Err(Error::Cancelled)));
    let live = CancellationToken::new();
    assert_eq!(queue.dequeue(&live).await.unwrap().id(), id);
}

#[tokio::test]
async fn closed_queue_drains_then_reports_closed() {
    let queue = WorkQueue::new(4).unwrap();
    let token = CancellationToken::new();

    let item = noop_item();
    let id = item.id();
    queue.enqueue(item).await.unwrap();
    queue.close();

    assert!(matches!(queue.enqueue(noop_item()).await, Err(Error::Closed)));
    assert!(matches!(queue.try_enqueue(noop_item()), Err(Error::Closed)));
    assert_eq!(queue.dequeue(&token).await.unwrap().id(), id);
    assert!(matches!(queue.dequeue(&token).await, Err(Error::Closed)));
}

#[tokio::test]
async fn close_releases_blocked_producer_and_waiting_consumer() {
    let queue = Arc::new(WorkQueue::new(1).unwrap());
    let token = CancellationToken::new();

    // A consumer parked on an empty queue.
    let consumer = {
        let queue = Arc::clone(&queue);
        let token = token.clone();
        tokio::spawn(async move { queue.dequeue(&token).await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.close();

    let result = tokio::time::timeout(Duration::from_secs(1), consumer)
        .await
        .expect("consumer not released by close")
        .unwrap();
    assert!(matches!(result, Err(Error::Closed)));

    // A producer parked on a full queue.
    let full = Arc::new(WorkQueue::new(1).unwrap());
    full.enqueue(noop_item()).await.unwrap();
    let producer = {
        let full = Arc::clone(&full);
        tokio::spawn(async move { full.enqueue(noop_item()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    full.close();

    let result = tokio::time::timeout(Duration::from_secs(1), producer)
        .await
        .expect("producer not released by close")
        .unwrap();
    assert!(matches!(result, Err(Error::Closed)));
}
