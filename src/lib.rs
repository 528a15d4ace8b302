//! # scopework
//!
//! In-process background work engine.
//!
//! Producers hand async work to a [`BackgroundWorker`](worker::BackgroundWorker),
//! which queues it on a bounded [`WorkQueue`](queue::WorkQueue). A
//! [`BackgroundTaskService`](engine::BackgroundTaskService) drains the queue,
//! running every item under a fresh scope bound to a session, with the scope
//! exposed to nested code through the [`context`] module. A failing item never
//! affects the loop or any other item.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod event;
pub mod model;
pub mod queue;
pub mod session;
pub mod telemetry;
pub mod worker;

pub use engine::{BackgroundTaskService, ServiceConfig};
pub use error::{Error, Result};
pub use worker::BackgroundWorker;
