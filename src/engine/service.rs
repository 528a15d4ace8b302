//! Background task service: supervised consumer loops over the work queue.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::execution::Runner;
use crate::error::{Error, Result};
use crate::event::{Event, EventKind};
use crate::session::{ScopeFactory, SessionManager};
use crate::worker::BackgroundWorker;

/// Configuration for the background task service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Number of consumer loops pulling from the queue.
    pub consumers: usize,
    /// Attempts at ending a session before the failure is logged as an error.
    pub session_end_attempts: u32,
    /// Pause between session end attempts.
    pub session_end_backoff: Duration,
    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            consumers: 1,
            session_end_attempts: 1,
            session_end_backoff: Duration::from_millis(50),
            event_capacity: 1024,
        }
    }
}

struct Running {
    shutdown: CancellationToken,
    loops: Vec<JoinHandle<()>>,
}

impl Running {
    /// Every loop has exited, whether through `stop`, host cancellation or
    /// a closed and drained queue.
    fn is_finished(&self) -> bool {
        self.loops.iter().all(JoinHandle::is_finished)
    }
}

/// Owns the consumer loops. Each loop takes one item at a time, runs it
/// under a fresh scope and session, and keeps going no matter how the
/// item ends.
pub struct BackgroundTaskService {
    runner: Arc<Runner>,
    running: Mutex<Option<Running>>,
}

impl BackgroundTaskService {
    pub fn new(
        worker: BackgroundWorker,
        scopes: Arc<dyn ScopeFactory>,
        sessions: Arc<dyn SessionManager>,
        config: ServiceConfig,
    ) -> Result<Self> {
        if config.consumers == 0 {
            return Err(Error::InvalidArgument(
                "consumer count must be positive".to_string(),
            ));
        }
        Ok(Self {
            runner: Arc::new(Runner::new(worker, scopes, sessions, config)),
            running: Mutex::new(None),
        })
    }

    /// The submission handle feeding this service.
    pub fn worker(&self) -> &BackgroundWorker {
        &self.runner.worker
    }

    /// Subscribe to execution events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.runner.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state()
            .is_ok_and(|s| s.as_ref().is_some_and(|r| !r.is_finished()))
    }

    /// Spawn the consumer loops. They stop when `token` is cancelled, when
    /// the queue is closed and drained, or when [`stop`](Self::stop) is
    /// called. Once they have all exited the service can be started again.
    pub fn start(&self, token: &CancellationToken) -> Result<()> {
        let mut state = self.state()?;
        match state.as_ref() {
            Some(running) if !running.is_finished() => return Err(Error::AlreadyRunning),
            Some(_) => debug!("previous consumer loops already exited, restarting"),
            None => {}
        }

        let shutdown = token.child_token();
        let consumers = self.runner.config().consumers;
        let loops = (0..consumers)
            .map(|consumer| {
                tokio::spawn(consume(
                    Arc::clone(&self.runner),
                    consumer,
                    shutdown.clone(),
                ))
            })
            .collect();

        *state = Some(Running { shutdown, loops });
        info!(consumers, "background task service started");
        Ok(())
    }

    /// Ask the loops to stop and wait for them.
    ///
    /// Items already executing are allowed to finish. If `token` fires
    /// first, the remaining loops and their in-flight items are aborted.
    pub async fn stop(&self, token: &CancellationToken) -> Result<()> {
        let Some(running) = self.state()?.take() else {
            return Ok(());
        };
        running.shutdown.cancel();

        let aborts: Vec<_> = running.loops.iter().map(|h| h.abort_handle()).collect();
        let join_all = async {
            for handle in running.loops {
                if let Err(e) = handle.await {
                    error!(error = %e, "consumer loop terminated abnormally");
                }
            }
        };

        tokio::select! {
            _ = join_all => {
                info!("background task service stopped");
            }
            _ = token.cancelled() => {
                warn!("stop deadline reached, aborting consumer loops");
                for abort in aborts {
                    abort.abort();
                }
            }
        }
        Ok(())
    }

    fn state(&self) -> Result<MutexGuard<'_, Option<Running>>> {
        self.running
            .lock()
            .map_err(|_| Error::Other("service state lock poisoned".to_string()))
    }
}

/// One consumer loop: receive, process, repeat until cancelled.
async fn consume(runner: Arc<Runner>, consumer: usize, shutdown: CancellationToken) {
    info!(consumer, "consumer started");
    loop {
        // A stop requested mid-item is honored here, after the item finished.
        if shutdown.is_cancelled() {
            info!(consumer, "stop requested, consumer exiting");
            break;
        }
        match runner.worker.receive(&shutdown).await {
            Ok(item) => runner.process_isolated(item, &shutdown).await,
            Err(Error::Cancelled) => {
                info!(consumer, "cancelled while idle, consumer exiting");
                break;
            }
            Err(Error::Closed) => {
                info!(consumer, "work queue closed and drained, consumer exiting");
                break;
            }
            Err(e) => {
                error!(consumer, error = %e, "unexpected receive failure");
            }
        }
    }
    runner.emit(EventKind::ConsumerStopped { consumer });
}
