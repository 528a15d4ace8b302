//! Ambient "current scope" for code running inside a work item.
//!
//! The slot is a tokio task-local, so it follows one logical execution
//! across suspension points and worker threads instead of being pinned to
//! an OS thread. Outside of [`with_ambient`] every accessor sees an empty
//! slot, and [`set`] fails.

use std::cell::RefCell;
use std::future::Future;

use crate::error::{Error, Result};
use crate::model::{Scope, ScopeId, SessionId};

tokio::task_local! {
    static CURRENT_SCOPE: RefCell<Option<Scope>>;
}

/// Run `fut` with its own, initially empty, ambient slot.
///
/// The slot is dropped when `fut` completes, so nothing installed inside
/// can leak to later work.
pub async fn with_ambient<F>(fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_SCOPE.scope(RefCell::new(None), fut).await
}

/// Publish `scope` as the current scope of this execution.
pub fn set(scope: Scope) -> Result<()> {
    CURRENT_SCOPE
        .try_with(|slot| {
            *slot.borrow_mut() = Some(scope);
        })
        .map_err(|_| Error::Other("no ambient context in this task".to_string()))
}

/// Empty the slot. A no-op outside an ambient context.
pub fn clear() {
    let _ = CURRENT_SCOPE.try_with(|slot| slot.borrow_mut().take());
}

/// The scope currently executing, if any.
pub fn current() -> Option<Scope> {
    CURRENT_SCOPE
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten()
}

pub fn current_scope_id() -> Option<ScopeId> {
    CURRENT_SCOPE
        .try_with(|slot| slot.borrow().as_ref().map(|s| s.id))
        .ok()
        .flatten()
}

pub fn current_session_id() -> Option<SessionId> {
    CURRENT_SCOPE
        .try_with(|slot| slot.borrow().as_ref().and_then(Scope::session_id))
        .ok()
        .flatten()
}

/// Installs a scope and clears it again on drop, including during unwinding.
#[must_use = "the scope is cleared as soon as the guard is dropped"]
pub struct ScopeGuard(());

/// Set `scope` as current and return a guard that clears it.
pub fn install(scope: Scope) -> Result<ScopeGuard> {
    set(scope)?;
    Ok(ScopeGuard(()))
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        clear();
    }
}
