//! Background task service: consumer loops, per-item scope and session
//! orchestration, failure isolation.

mod execution;
pub mod service;

pub use execution::Outcome;
pub use service::{BackgroundTaskService, ServiceConfig};
