//! Metric instrument factories for scopework.
//!
//! Instruments come from the globally-registered `MeterProvider`; without
//! one installed they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("scopework")
}

/// Counter: work submissions.
/// Labels: `result` ("ok" | "full" | "closed" | "invalid").
pub fn work_submitted() -> Counter<u64> {
    meter()
        .u64_counter("scopework.work.submitted")
        .with_description("Number of work items submitted")
        .build()
}

/// Counter: finished work executions.
/// Labels: `result` ("ok" | "error" | "panic" | "abandoned").
pub fn work_executed() -> Counter<u64> {
    meter()
        .u64_counter("scopework.work.executed")
        .with_description("Number of work items executed")
        .build()
}

/// Counter: queue-level operations.
/// Labels: `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("scopework.queue.operations")
        .with_description("Number of work queue operations")
        .build()
}

/// Histogram: time a work item spent queued before execution.
pub fn queue_wait_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("scopework.queue.wait_ms")
        .with_description("Time between submission and execution start")
        .with_unit("ms")
        .build()
}

/// Histogram: work function execution time.
pub fn work_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("scopework.work.duration_ms")
        .with_description("Work function execution time")
        .with_unit("ms")
        .build()
}

/// Counter: session manager failures.
/// Labels: `stage` ("create" | "attach" | "end").
pub fn session_failures() -> Counter<u64> {
    meter()
        .u64_counter("scopework.session.failures")
        .with_description("Session manager call failures")
        .build()
}

/// Counter: scope factory failures.
pub fn scope_failures() -> Counter<u64> {
    meter()
        .u64_counter("scopework.scope.failures")
        .with_description("Scope factory failures")
        .build()
}
