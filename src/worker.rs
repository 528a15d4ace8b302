//! Producer-facing submission API.
//!
//! `BackgroundWorker` is the only thing producers touch. Submission is
//! fire-and-forget: it returns once the item is queued, and nothing that
//! happens while the item runs is reported back to the submitter.

use std::future::Future;
use std::sync::Arc;

use opentelemetry::KeyValue;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context;
use crate::error::{Error, Result};
use crate::model::{Scope, Session, WorkFn, WorkId, WorkItem};
use crate::queue::WorkQueue;
use crate::telemetry::metrics;

/// Cheaply cloneable handle onto a shared work queue.
#[derive(Debug, Clone)]
pub struct BackgroundWorker {
    queue: Arc<WorkQueue>,
}

impl BackgroundWorker {
    pub fn new(queue: Arc<WorkQueue>) -> Self {
        Self { queue }
    }

    /// Create a worker over a fresh queue of the given capacity.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Ok(Self::new(Arc::new(WorkQueue::new(capacity)?)))
    }

    /// Queue `work`, waiting for space if the queue is full.
    ///
    /// With `parent_session` the item joins that session; otherwise a new
    /// session is created for it when it runs.
    pub async fn submit<F, Fut>(&self, work: F, parent_session: Option<Session>) -> Result<WorkId>
    where
        F: FnOnce(Scope, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.submit_item(WorkItem::new(work, parent_session)).await
    }

    /// Queue an already-boxed work function. A missing function is rejected
    /// with `InvalidArgument` and nothing is queued.
    pub async fn submit_boxed(
        &self,
        work: Option<WorkFn>,
        parent_session: Option<Session>,
    ) -> Result<WorkId> {
        let item = WorkItem::try_new(work, parent_session).inspect_err(|_| {
            metrics::work_submitted().add(1, &[KeyValue::new("result", "invalid")]);
        })?;
        self.submit_item(item).await
    }

    /// Queue a prepared work item.
    pub async fn submit_item(&self, item: WorkItem) -> Result<WorkId> {
        let item = item.with_origin(context::current_scope_id());
        let id = item.id();
        let result = self.queue.enqueue(item).await;
        record_submit(&result);
        result?;
        debug!(work_id = %id, pending = self.queue.len(), "work submitted");
        Ok(id)
    }

    /// Queue `work` without waiting. Fails with `QueueFull` at capacity.
    pub fn try_submit<F, Fut>(&self, work: F, parent_session: Option<Session>) -> Result<WorkId>
    where
        F: FnOnce(Scope, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let item = WorkItem::new(work, parent_session).with_origin(context::current_scope_id());
        let id = item.id();
        let result = self.queue.try_enqueue(item);
        record_submit(&result);
        result?;
        debug!(work_id = %id, "work submitted");
        Ok(id)
    }

    /// Take the next item. Used by the background task service.
    pub async fn receive(&self, token: &CancellationToken) -> Result<WorkItem> {
        self.queue.dequeue(token).await
    }

    /// Refuse further submissions. Queued items still drain.
    pub fn close(&self) {
        self.queue.close();
    }

    /// Items queued and not yet received.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }
}

fn record_submit(result: &Result<()>) {
    let label = match result {
        Ok(()) => "ok",
        Err(Error::QueueFull) => "full",
        Err(_) => "closed",
    };
    metrics::work_submitted().add(1, &[KeyValue::new("result", label)]);
}
