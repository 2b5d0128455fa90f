//! One node at a time, in topological order.

use super::execution::RunState;
use super::{RunResult, Runner};
use crate::cancellation::CancellationToken;
use crate::errors::NodeflowError;
use crate::events::{EventSink, NoOpEventSink};
use crate::io::{memory_factory, DataCatalog};
use crate::pipeline::Pipeline;
use async_trait::async_trait;
use std::sync::Arc;

/// Runs nodes strictly one after another on the calling task.
///
/// The order is deterministic, which makes this runner the reference the
/// parallel runner is checked against.
#[derive(Clone)]
pub struct SequentialRunner {
    sink: Arc<dyn EventSink>,
    cancel: Option<Arc<CancellationToken>>,
}

impl Default for SequentialRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl SequentialRunner {
    /// Runner name.
    pub const NAME: &'static str = "SequentialRunner";

    /// Creates a runner that emits no events.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sink: Arc::new(NoOpEventSink),
            cancel: None,
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Stops dispatching nodes once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = Some(token);
        self
    }

    fn execute(run: &RunState, pipeline: &Pipeline) -> Result<(), NodeflowError> {
        for node in pipeline.nodes() {
            if let Some(cancelled) = run.cancelled() {
                return Err(cancelled.into());
            }
            if run.skip_if_complete(node) {
                continue;
            }
            run.execute_node(node)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SequentialRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialRunner")
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

#[async_trait]
impl Runner for SequentialRunner {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(
        &self,
        pipeline: &Pipeline,
        catalog: &DataCatalog,
        only_missing: bool,
    ) -> Result<RunResult, NodeflowError> {
        let run = RunState::begin(
            Self::NAME,
            pipeline,
            catalog,
            only_missing,
            memory_factory(),
            Arc::clone(&self.sink),
            self.cancel.clone(),
        )?;
        let outcome = Self::execute(&run, pipeline);
        run.finish(pipeline, outcome)
    }
}
