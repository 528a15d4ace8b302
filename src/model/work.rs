//! Work items: a boxed async function plus an optional parent session.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::{Scope, ScopeId, Session, WorkId};
use crate::error::{Error, Result};

/// The future a work function resolves to.
pub type WorkFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

/// A type-erased work function. Receives the executing scope and the
/// service's cancellation token, which it is responsible for honoring.
pub type WorkFn = Box<dyn FnOnce(Scope, CancellationToken) -> WorkFuture + Send + 'static>;

/// A unit of deferred work. Immutable once queued.
pub struct WorkItem {
    id: WorkId,
    work: WorkFn,
    parent_session: Option<Session>,
    origin: Option<ScopeId>,
    submitted_at: DateTime<Utc>,
}

impl WorkItem {
    /// Wrap a closure returning a future into a work item.
    pub fn new<F, Fut>(work: F, parent_session: Option<Session>) -> Self
    where
        F: FnOnce(Scope, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::from_boxed(
            Box::new(move |scope: Scope, token: CancellationToken| {
                Box::pin(work(scope, token)) as WorkFuture
            }),
            parent_session,
        )
    }

    /// Build a work item from an optional boxed function.
    ///
    /// A missing function is a caller error and is rejected here rather
    /// than being queued.
    pub fn try_new(work: Option<WorkFn>, parent_session: Option<Session>) -> Result<Self> {
        let work = work.ok_or_else(|| {
            Error::InvalidArgument("work function is required".to_string())
        })?;
        Ok(Self::from_boxed(work, parent_session))
    }

    fn from_boxed(work: WorkFn, parent_session: Option<Session>) -> Self {
        Self {
            id: WorkId::new(),
            work,
            parent_session,
            origin: None,
            submitted_at: Utc::now(),
        }
    }

    /// Record the scope this item was submitted from.
    pub(crate) fn with_origin(mut self, origin: Option<ScopeId>) -> Self {
        self.origin = origin;
        self
    }

    pub fn id(&self) -> WorkId {
        self.id
    }

    /// Session to attach to. `None` means a fresh session is created.
    pub fn parent_session(&self) -> Option<&Session> {
        self.parent_session.as_ref()
    }

    /// Ambient scope at submission time, used to derive the execution scope.
    pub fn origin(&self) -> Option<ScopeId> {
        self.origin
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    /// Consume the item, yielding the work function and its parent session.
    pub(crate) fn into_parts(self) -> (WorkFn, Option<Session>) {
        (self.work, self.parent_session)
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("parent_session", &self.parent_session)
            .field("origin", &self.origin)
            .field("submitted_at", &self.submitted_at)
            .finish_non_exhaustive()
    }
}
