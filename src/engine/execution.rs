//! One work item's run: scope, session, ambient context, execution, teardown.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use opentelemetry::KeyValue;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, warn};

use super::service::ServiceConfig;
use crate::context;
use crate::error::{Error, Result};
use crate::event::{Event, EventKind};
use crate::model::{Scope, ScopeId, Session, SessionId, WorkFn, WorkId, WorkItem};
use crate::session::{ScopeFactory, SessionManager};
use crate::telemetry::metrics;
use crate::telemetry::work::{record_session, record_state_transition, start_work_span};
use crate::worker::BackgroundWorker;

/// How a work function's execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed {
        duration_ms: u64,
    },
    Failed {
        /// Single-line error chain.
        error: String,
        /// Full debug rendering, including backtrace when captured.
        detail: String,
        duration_ms: u64,
    },
    Panicked {
        message: String,
        duration_ms: u64,
    },
}

/// Shared state behind every consumer loop of one service.
pub(crate) struct Runner {
    pub(crate) worker: BackgroundWorker,
    scopes: Arc<dyn ScopeFactory>,
    sessions: Arc<dyn SessionManager>,
    config: ServiceConfig,
    events: broadcast::Sender<Event>,
    seq: AtomicU64,
}

/// Aborts the task when dropped, so a forced stop does not leave it detached.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Runner {
    pub(crate) fn new(
        worker: BackgroundWorker,
        scopes: Arc<dyn ScopeFactory>,
        sessions: Arc<dyn SessionManager>,
        config: ServiceConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            worker,
            scopes,
            sessions,
            config,
            events,
            seq: AtomicU64::new(0),
        }
    }

    pub(crate) fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, kind: EventKind) {
        let event = Event {
            seq: self.seq.fetch_add(1, Ordering::Relaxed) + 1,
            timestamp: Utc::now(),
            kind,
        };
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Run one item in its own task so a panic in any collaborator is
    /// contained to this iteration.
    pub(crate) async fn process_isolated(self: &Arc<Self>, item: WorkItem, token: &CancellationToken) {
        let work_id = item.id();
        let handle = tokio::spawn(Arc::clone(self).process(item, token.clone()));
        let _abort = AbortOnDrop(handle.abort_handle());
        if let Err(e) = handle.await {
            let message = if e.is_panic() {
                panic_message(e.into_panic())
            } else {
                e.to_string()
            };
            error!(work_id = %work_id, error = %message, "work item orchestration crashed");
            metrics::work_executed().add(1, &[KeyValue::new("result", "abandoned")]);
            self.emit(EventKind::WorkAbandoned {
                id: work_id,
                scope_id: None,
                stage: "orchestration".to_string(),
                error: message,
            });
        }
    }

    async fn process(self: Arc<Self>, item: WorkItem, token: CancellationToken) {
        let work_id = item.id();
        let origin = item.origin();
        let waited_ms = (Utc::now() - item.submitted_at()).num_milliseconds().max(0) as f64;
        metrics::queue_wait_ms().record(waited_ms, &[]);
        let (work, parent) = item.into_parts();

        let scope = match origin {
            Some(origin) => self.scopes.create_child_scope(origin),
            None => self.scopes.create_scope(),
        };
        let mut scope = match scope {
            Ok(scope) => scope,
            Err(e) => {
                error!(work_id = %work_id, error = %e, "scope creation failed, abandoning work item");
                metrics::scope_failures().add(1, &[]);
                self.abandon(work_id, None, "scope", &e);
                return;
            }
        };

        let span = start_work_span(work_id, scope.id);
        async {
            let span = Span::current();
            record_state_transition(&span, "queued", "received");

            let session_id = match self.resolve_session(&mut scope, parent.as_ref()).await {
                Ok(id) => id,
                Err(e) => {
                    let stage = if parent.is_some() { "attach" } else { "create" };
                    error!(
                        work_id = %work_id,
                        scope_id = %scope.id,
                        stage,
                        error = %e,
                        "session resolution failed, abandoning work item"
                    );
                    metrics::session_failures().add(1, &[KeyValue::new("stage", stage)]);
                    record_state_transition(&span, "received", "abandoned");
                    self.abandon(work_id, Some(scope.id), stage, &e);
                    return;
                }
            };
            record_session(&span, session_id);
            record_state_transition(&span, "received", "running");
            self.emit(EventKind::WorkStarted {
                id: work_id,
                scope_id: scope.id,
                session_id,
            });

            let scope_id = scope.id;
            let outcome = execute(work, scope, token).await;
            let terminal = match &outcome {
                Outcome::Completed { duration_ms } => {
                    record_state_transition(&span, "running", "completed");
                    debug!(work_id = %work_id, duration_ms, "work item completed");
                    metrics::work_executed().add(1, &[KeyValue::new("result", "ok")]);
                    metrics::work_duration_ms().record(*duration_ms as f64, &[]);
                    EventKind::WorkCompleted {
                        id: work_id,
                        scope_id,
                        session_id,
                        duration_ms: *duration_ms,
                    }
                }
                Outcome::Failed {
                    error,
                    detail,
                    duration_ms,
                } => {
                    record_state_transition(&span, "running", "failed");
                    error!(
                        work_id = %work_id,
                        scope_id = %scope_id,
                        session_id = %session_id,
                        duration_ms,
                        error = %error,
                        detail = %detail,
                        "work item failed"
                    );
                    metrics::work_executed().add(1, &[KeyValue::new("result", "error")]);
                    metrics::work_duration_ms().record(*duration_ms as f64, &[]);
                    EventKind::WorkFailed {
                        id: work_id,
                        scope_id,
                        session_id,
                        error: error.clone(),
                        duration_ms: *duration_ms,
                    }
                }
                Outcome::Panicked {
                    message,
                    duration_ms,
                } => {
                    record_state_transition(&span, "running", "failed");
                    error!(
                        work_id = %work_id,
                        scope_id = %scope_id,
                        session_id = %session_id,
                        duration_ms,
                        error = %message,
                        "work item panicked"
                    );
                    metrics::work_executed().add(1, &[KeyValue::new("result", "panic")]);
                    EventKind::WorkPanicked {
                        id: work_id,
                        scope_id,
                        session_id,
                        message: message.clone(),
                    }
                }
            };

            // Runs whatever the outcome; a failure here is reported on its own.
            self.end_session(session_id).await;
            self.emit(terminal);
        }
        .instrument(span)
        .await
    }

    async fn resolve_session(&self, scope: &mut Scope, parent: Option<&Session>) -> Result<SessionId> {
        if let Some(existing) = scope.session_id() {
            return Err(Error::SessionAlreadyBound {
                scope: scope.id,
                session: existing,
            });
        }
        let session_id = match parent {
            None => self.sessions.create_session(scope.id).await?.id,
            Some(session) => {
                self.sessions.attach_scope(session, scope.id).await?;
                session.id
            }
        };
        scope.bind_session(session_id)?;
        Ok(session_id)
    }

    /// End the session, retrying up to the configured number of attempts.
    async fn end_session(&self, session_id: SessionId) {
        let attempts = self.config.session_end_attempts.max(1);
        for attempt in 1..=attempts {
            match self.sessions.end_session(session_id).await {
                Ok(()) => {
                    debug!(session_id = %session_id, attempt, "session ended");
                    self.emit(EventKind::SessionEnded { session_id });
                    return;
                }
                Err(e) if attempt < attempts => {
                    warn!(session_id = %session_id, attempt, error = %e, "session end failed, retrying");
                    tokio::time::sleep(self.config.session_end_backoff).await;
                }
                Err(e) => {
                    error!(session_id = %session_id, attempts, error = %e, "failed to end session");
                    metrics::session_failures().add(1, &[KeyValue::new("stage", "end")]);
                    self.emit(EventKind::SessionEndFailed {
                        session_id,
                        error: e.to_string(),
                        attempts,
                    });
                }
            }
        }
    }

    fn abandon(&self, id: WorkId, scope_id: Option<ScopeId>, stage: &str, e: &Error) {
        metrics::work_executed().add(1, &[KeyValue::new("result", "abandoned")]);
        self.emit(EventKind::WorkAbandoned {
            id,
            scope_id,
            stage: stage.to_string(),
            error: e.to_string(),
        });
    }
}

/// Run the work function in its own task with `scope` installed as the
/// ambient scope. The slot is cleared when the function returns, fails or
/// panics, and it never exists outside that task.
async fn execute(work: WorkFn, scope: Scope, token: CancellationToken) -> Outcome {
    let started = Instant::now();
    let handle = tokio::spawn(
        context::with_ambient(async move {
            let result: anyhow::Result<()> = match context::install(scope.clone()) {
                Ok(_installed) => work(scope, token).await,
                Err(e) => Err(e.into()),
            };
            result
        })
        .in_current_span(),
    );
    let _abort = AbortOnDrop(handle.abort_handle());
    let joined = handle.await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match joined {
        Ok(Ok(())) => Outcome::Completed { duration_ms },
        Ok(Err(e)) => Outcome::Failed {
            error: format!("{e:#}"),
            detail: format!("{e:?}"),
            duration_ms,
        },
        Err(e) if e.is_panic() => Outcome::Panicked {
            message: panic_message(e.into_panic()),
            duration_ms,
        },
        Err(e) => Outcome::Failed {
            error: format!("work task did not finish: {e}"),
            detail: format!("{e:?}"),
            duration_ms,
        },
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
