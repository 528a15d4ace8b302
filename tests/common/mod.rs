//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scopework::event::{Event, EventKind};
use scopework::model::{ScopeId, Session, SessionId, WorkId};
use scopework::session::{DefaultScopeFactory, SessionManager};
use scopework::{BackgroundTaskService, BackgroundWorker, Error, Result, ServiceConfig};
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

// ---------------------------------------------------------------------------
// Recording session manager
// ---------------------------------------------------------------------------

/// Session manager that records every call and can be told to fail.
#[derive(Default)]
pub struct RecordingSessionManager {
    pub created: Mutex<Vec<(SessionId, ScopeId)>>,
    pub attached: Mutex<Vec<(SessionId, ScopeId)>>,
    pub ended: Mutex<Vec<SessionId>>,
    pub end_calls: AtomicUsize,
    pub fail_create: AtomicBool,
    pub fail_attach: AtomicBool,
    /// Number of upcoming end calls that fail.
    pub fail_end_times: AtomicUsize,
}

impl RecordingSessionManager {
    pub fn created_ids(&self) -> Vec<SessionId> {
        self.created.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }

    pub fn attached_ids(&self) -> Vec<SessionId> {
        self.attached.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }

    pub fn ended_ids(&self) -> Vec<SessionId> {
        self.ended.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionManager for RecordingSessionManager {
    async fn create_session(&self, scope_id: ScopeId) -> Result<Session> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::Dependency("session store unavailable".to_string()));
        }
        let session = Session::new();
        self.created.lock().unwrap().push((session.id, scope_id));
        Ok(session)
    }

    async fn attach_scope(&self, session: &Session, scope_id: ScopeId) -> Result<()> {
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(Error::Dependency("session store unavailable".to_string()));
        }
        self.attached.lock().unwrap().push((session.id, scope_id));
        Ok(())
    }

    async fn end_session(&self, session_id: SessionId) -> Result<()> {
        self.end_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_end_times
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Dependency("session store timed out".to_string()));
        }
        self.ended.lock().unwrap().push(session_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Service helpers
// ---------------------------------------------------------------------------

pub fn service_with(
    sessions: Arc<dyn SessionManager>,
    capacity: usize,
    config: ServiceConfig,
) -> BackgroundTaskService {
    BackgroundTaskService::new(
        BackgroundWorker::with_capacity(capacity).unwrap(),
        Arc::new(DefaultScopeFactory),
        sessions,
        config,
    )
    .unwrap()
}

/// Collect events until `count` work items have finished.
pub async fn wait_for_finished(
    events: &mut broadcast::Receiver<Event>,
    count: usize,
) -> Vec<Event> {
    let mut seen = Vec::new();
    let mut finished = 0;
    tokio::time::timeout(Duration::from_secs(5), async {
        while finished < count {
            let event = events.recv().await.expect("event stream closed");
            if event.kind.finished_work().is_some() {
                finished += 1;
            }
            seen.push(event);
        }
    })
    .await
    .expect("timed out waiting for work items to finish");
    seen
}

pub fn finished_order(events: &[Event]) -> Vec<WorkId> {
    events
        .iter()
        .filter_map(|e| e.kind.finished_work())
        .collect()
}

pub fn count_kind(events: &[Event], pred: impl Fn(&EventKind) -> bool) -> usize {
    events.iter().filter(|e| pred(&e.kind)).count()
}

// ---------------------------------------------------------------------------
// Log capture
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    /// Message plus every field, rendered as `name=value`.
    pub text: String,
    /// Name of the span the event was recorded in.
    pub span: Option<String>,
}

/// A tracing layer that keeps every event it sees.
#[derive(Clone, Default)]
pub struct LogCapture {
    pub events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    pub fn errors(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.level == Level::ERROR)
            .map(|e| e.text.clone())
            .collect()
    }

    /// Span names of every captured event whose text contains `needle`.
    pub fn spans_of(&self, needle: &str) -> Vec<Option<String>> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.text.contains(needle))
            .map(|e| e.span.clone())
            .collect()
    }
}

struct TextVisitor<'a>(&'a mut String);

impl Visit for TextVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        use std::fmt::Write as _;
        let _ = write!(self.0, "{}={:?} ", field.name(), value);
    }
}

impl<S> Layer<S> for LogCapture
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let mut text = String::new();
        event.record(&mut TextVisitor(&mut text));
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            text,
            span: ctx.event_span(event).map(|s| s.name().to_string()),
        });
    }
}
