//! Structured events emitted by the background task service.
//!
//! Every work item produces a terminal event (completed, failed, panicked
//! or abandoned), and every session end attempt is reported. Subscribers
//! use them for dashboards, audit trails, or to wait on progress in tests.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{ScopeId, SessionId, WorkId};

/// A structured event emitted by the engine.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Monotonic sequence number per service. Consumers can detect gaps.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    WorkStarted {
        id: WorkId,
        scope_id: ScopeId,
        session_id: SessionId,
    },
    WorkCompleted {
        id: WorkId,
        scope_id: ScopeId,
        session_id: SessionId,
        duration_ms: u64,
    },
    WorkFailed {
        id: WorkId,
        scope_id: ScopeId,
        session_id: SessionId,
        error: String,
        duration_ms: u64,
    },
    WorkPanicked {
        id: WorkId,
        scope_id: ScopeId,
        session_id: SessionId,
        message: String,
    },
    /// Scope creation or session resolution failed; the work never ran.
    WorkAbandoned {
        id: WorkId,
        scope_id: Option<ScopeId>,
        stage: String,
        error: String,
    },
    SessionEnded {
        session_id: SessionId,
    },
    SessionEndFailed {
        session_id: SessionId,
        error: String,
        attempts: u32,
    },
    ConsumerStopped {
        consumer: usize,
    },
}

impl EventKind {
    /// The work item this event concludes, if it is a terminal work event.
    pub fn finished_work(&self) -> Option<WorkId> {
        match self {
            EventKind::WorkCompleted { id, .. }
            | EventKind::WorkFailed { id, .. }
            | EventKind::WorkPanicked { id, .. }
            | EventKind::WorkAbandoned { id, .. } => Some(*id),
            _ => None,
        }
    }
}
