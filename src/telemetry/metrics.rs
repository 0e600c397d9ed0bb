//! Metric instrument factories for workq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without one installed these are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("workq")
}

/// Counter: queue-level operations.
/// Labels: `queue`, `operation` ("create" | "claim" | "claim_empty" |
/// "release" | "delete" | "create_queue" | "delete_queue").
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("workq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: items finished by a runner.
/// Labels: `queue`, `result` ("done" | "retry" | "abandoned" | "suspended").
pub fn items_processed() -> Counter<u64> {
    meter()
        .u64_counter("workq.runner.items")
        .with_description("Items handled by queue runners")
        .build()
}

/// Histogram: handler duration in milliseconds.
/// Labels: `queue`.
pub fn handler_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("workq.runner.handler.duration_ms")
        .with_description("Time spent in item handlers")
        .with_unit("ms")
        .build()
}
