//! # workq
//!
//! Lease-based work queues.
//!
//! Provides the [`queue::QueueStore`] contract every backend honours, an
//! in-process reference backend ([`queue::MemoryQueue`]), a named-queue
//! factory, a worker [`runner`], and OpenTelemetry observability.

pub mod clock;
pub mod config;
pub mod error;
pub mod model;
pub mod queue;
pub mod runner;
pub mod telemetry;
