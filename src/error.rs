//! Error types for scopework.

use thiserror::Error;

use crate::model::{ScopeId, SessionId};

#[derive(Debug, Error)]
pub enum Error {
    /// A caller programming error, surfaced synchronously at submission.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid queue capacity {0}: capacity must be positive")]
    InvalidCapacity(usize),

    #[error("work queue is full")]
    QueueFull,

    #[error("work queue is closed")]
    Closed,

    /// Dequeue was cancelled while waiting. An orderly shutdown signal, not a failure.
    #[error("operation cancelled")]
    Cancelled,

    /// Session store or scope factory failure.
    #[error("dependency failure: {0}")]
    Dependency(String),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("scope {scope} is already bound to session {session}")]
    SessionAlreadyBound { scope: ScopeId, session: SessionId },

    #[error("background task service is already running")]
    AlreadyRunning,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
