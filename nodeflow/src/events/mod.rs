//! Lifecycle events emitted by runners.
//!
//! Runners report `pipeline.*` and `node.*` events to an [`EventSink`]
//! owned by the runner instance; there is no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event emitted once before the first node is dispatched.
pub const PIPELINE_STARTED: &str = "pipeline.started";
/// Event emitted after every node finished and free outputs were loaded.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
/// Event emitted when a run stops with an error.
pub const PIPELINE_FAILED: &str = "pipeline.failed";
/// Event emitted when a node is dispatched.
pub const NODE_STARTED: &str = "node.started";
/// Event emitted when a node saved all of its outputs.
pub const NODE_COMPLETED: &str = "node.completed";
/// Event emitted when `only_missing` skips a node.
pub const NODE_SKIPPED: &str = "node.skipped";
/// Event emitted when a node's computation or IO fails.
pub const NODE_FAILED: &str = "node.failed";
