//! Bounded FIFO queue of work items between producers and consumer loops.
//!
//! Backed by a tokio bounded mpsc channel. The receiver sits behind an
//! async mutex so any number of consumer loops can share it; tokio's
//! mutex is fair, so waiting consumers are served in arrival order.
//! Closing is signalled out of band so it never contends for that mutex.

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::model::WorkItem;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

pub struct WorkQueue {
    tx: mpsc::Sender<WorkItem>,
    rx: Mutex<mpsc::Receiver<WorkItem>>,
    closed: CancellationToken,
    capacity: usize,
}

impl WorkQueue {
    /// Create a queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidCapacity(capacity));
        }
        let (tx, rx) = mpsc::channel(capacity);
        Ok(Self {
            tx,
            rx: Mutex::new(rx),
            closed: CancellationToken::new(),
            capacity,
        })
    }

    /// Append an item, waiting for space if the queue is full.
    pub async fn enqueue(&self, item: WorkItem) -> Result<()> {
        let result = if self.is_closed() {
            Err(Error::Closed)
        } else {
            tokio::select! {
                sent = self.tx.send(item) => sent.map_err(|_| Error::Closed),
                _ = self.closed.cancelled() => Err(Error::Closed),
            }
        };
        record_op(if result.is_ok() { "enqueue" } else { "enqueue_closed" });
        result
    }

    /// Append an item without waiting. Fails with `QueueFull` at capacity.
    pub fn try_enqueue(&self, item: WorkItem) -> Result<()> {
        let result = if self.is_closed() {
            Err(Error::Closed)
        } else {
            self.tx.try_send(item).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => Error::QueueFull,
                mpsc::error::TrySendError::Closed(_) => Error::Closed,
            })
        };
        record_op(match &result {
            Ok(()) => "enqueue",
            Err(Error::QueueFull) => "enqueue_full",
            Err(_) => "enqueue_closed",
        });
        result
    }

    /// Remove the head item, waiting while the queue is empty.
    ///
    /// Returns `Error::Cancelled` if `token` fires while waiting, and
    /// `Error::Closed` once the queue is closed and drained. Receiving is
    /// cancel-safe: an abandoned wait never loses an item.
    pub async fn dequeue(&self, token: &CancellationToken) -> Result<WorkItem> {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            item = self.recv() => item,
        };
        record_op(match &result {
            Ok(_) => "dequeue",
            Err(Error::Cancelled) => "dequeue_cancelled",
            Err(_) => "dequeue_closed",
        });
        result
    }

    async fn recv(&self) -> Result<WorkItem> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            item = rx.recv() => item.ok_or(Error::Closed),
            // Drain whatever is left before reporting closed.
            _ = self.closed.cancelled() => rx.try_recv().map_err(|_| Error::Closed),
        }
    }

    /// Stop accepting new items. Items already queued can still be dequeued,
    /// and producers blocked on a full queue are released with `Closed`.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Number of items currently buffered.
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

fn record_op(operation: &'static str) {
    metrics::queue_operations().add(1, &[KeyValue::new("operation", operation)]);
}
