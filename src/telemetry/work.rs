//! Work execution span helpers.

use tracing::Span;

use crate::model::{ScopeId, SessionId, WorkId};

/// Start a span covering one work item's scope, session and execution.
///
/// `session.id` and `work.state` are declared empty; fill them with
/// [`record_session`] and [`record_state_transition`].
pub fn start_work_span(work_id: WorkId, scope_id: ScopeId) -> Span {
    tracing::info_span!(
        "work.execute",
        "work.id" = %work_id.0,
        "scope.id" = %scope_id.0,
        "session.id" = tracing::field::Empty,
        "work.state" = tracing::field::Empty,
    )
}

/// Record the session the scope was bound to.
pub fn record_session(span: &Span, session_id: SessionId) {
    span.record("session.id", tracing::field::display(session_id.0));
}

/// Record a state transition on the span and emit it as an `info` event.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("work.state", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
