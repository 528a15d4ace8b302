//! Execution scopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ScopeId, SessionId};
use crate::error::{Error, Result};

/// An isolated execution context for one work item run.
///
/// Created immediately before the item executes and discarded right after.
/// The session id is bound exactly once, during session resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub id: ScopeId,
    /// Scope that was executing when the work item was submitted, if any.
    pub parent: Option<ScopeId>,
    session_id: Option<SessionId>,
    pub created_at: DateTime<Utc>,
}

impl Scope {
    /// A fresh root scope with no session.
    pub fn new() -> Self {
        Self {
            id: ScopeId::new(),
            parent: None,
            session_id: None,
            created_at: Utc::now(),
        }
    }

    /// A fresh scope derived from `parent`.
    pub fn child_of(parent: ScopeId) -> Self {
        Self {
            parent: Some(parent),
            ..Self::new()
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    /// Bind this scope to a session. Fails if it is already bound.
    pub fn bind_session(&mut self, session: SessionId) -> Result<()> {
        if let Some(existing) = self.session_id {
            return Err(Error::SessionAlreadyBound {
                scope: self.id,
                session: existing,
            });
        }
        self.session_id = Some(session);
        Ok(())
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}
