//! Session and scope collaborators.
//!
//! The engine only depends on the [`SessionManager`] and [`ScopeFactory`]
//! traits. [`InMemorySessionManager`] and [`DefaultScopeFactory`] are the
//! in-process implementations used by the binary and tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{Scope, ScopeId, Session, SessionId};

/// Creates, extends and ends sessions.
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Create a new session with `scope_id` as its first member.
    ///
    /// Fails with `Error::Dependency` when the backing store is unavailable.
    async fn create_session(&self, scope_id: ScopeId) -> Result<Session>;

    /// Attach `scope_id` to an existing session.
    async fn attach_scope(&self, session: &Session, scope_id: ScopeId) -> Result<()>;

    /// End the session's participation for the calling scope.
    async fn end_session(&self, session_id: SessionId) -> Result<()>;
}

/// Mints execution scopes.
pub trait ScopeFactory: Send + Sync {
    /// A scope with a fresh unique id and no session.
    fn create_scope(&self) -> Result<Scope>;

    /// A fresh scope derived from `parent`.
    fn create_child_scope(&self, parent: ScopeId) -> Result<Scope> {
        let mut scope = self.create_scope()?;
        scope.parent = Some(parent);
        Ok(scope)
    }
}

/// Scope factory backed by random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultScopeFactory;

impl ScopeFactory for DefaultScopeFactory {
    fn create_scope(&self) -> Result<Scope> {
        Ok(Scope::new())
    }

    fn create_child_scope(&self, parent: ScopeId) -> Result<Scope> {
        Ok(Scope::child_of(parent))
    }
}

// ---------------------------------------------------------------------------
// In-memory session manager
// ---------------------------------------------------------------------------

/// Point-in-time view of one live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub scopes: Vec<ScopeId>,
    /// Participants that have not yet ended their part of the session.
    pub holders: usize,
}

struct SessionRecord {
    session: Session,
    scopes: Vec<ScopeId>,
    holders: usize,
}

/// Reference-counted in-process session table.
///
/// Creating a session counts as one holder, each attach adds one, and each
/// end releases one. The record is dropped when the last holder ends it.
/// Attaching to a session the table does not know (created elsewhere, or
/// already fully ended) registers it again.
#[derive(Default)]
pub struct InMemorySessionManager {
    sessions: Mutex<HashMap<SessionId, SessionRecord>>,
}

impl InMemorySessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions still held by at least one participant.
    pub fn active_count(&self) -> usize {
        self.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_active(&self, id: SessionId) -> bool {
        self.lock().is_ok_and(|s| s.contains_key(&id))
    }

    /// Live sessions, oldest first.
    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let Ok(sessions) = self.lock() else {
            return Vec::new();
        };
        let mut out: Vec<_> = sessions
            .values()
            .map(|r| SessionSnapshot {
                id: r.session.id,
                created_at: r.session.created_at,
                scopes: r.scopes.clone(),
                holders: r.holders,
            })
            .collect();
        out.sort_by_key(|s| s.created_at);
        out
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<SessionId, SessionRecord>>> {
        self.sessions
            .lock()
            .map_err(|_| Error::Dependency("session table lock poisoned".to_string()))
    }
}

#[async_trait]
impl SessionManager for InMemorySessionManager {
    async fn create_session(&self, scope_id: ScopeId) -> Result<Session> {
        let session = Session::new();
        self.lock()?.insert(
            session.id,
            SessionRecord {
                session: session.clone(),
                scopes: vec![scope_id],
                holders: 1,
            },
        );
        debug!(session_id = %session.id, scope_id = %scope_id, "session created");
        Ok(session)
    }

    async fn attach_scope(&self, session: &Session, scope_id: ScopeId) -> Result<()> {
        let mut sessions = self.lock()?;
        let record = sessions.entry(session.id).or_insert_with(|| {
            debug!(session_id = %session.id, "registering session created elsewhere");
            SessionRecord {
                session: session.clone(),
                scopes: Vec::new(),
                holders: 0,
            }
        });
        record.scopes.push(scope_id);
        record.holders += 1;
        debug!(session_id = %session.id, scope_id = %scope_id, holders = record.holders, "scope attached");
        Ok(())
    }

    async fn end_session(&self, session_id: SessionId) -> Result<()> {
        let mut sessions = self.lock()?;
        let record = sessions
            .get_mut(&session_id)
            .ok_or(Error::SessionNotFound(session_id))?;
        record.holders = record.holders.saturating_sub(1);
        if record.holders == 0 {
            sessions.remove(&session_id);
            debug!(session_id = %session_id, "session ended");
        }
        Ok(())
    }
}
