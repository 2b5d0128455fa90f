//! Layer-by-layer execution on a bounded pool of blocking tasks.

use super::execution::RunState;
use super::{RunResult, Runner};
use crate::cancellation::CancellationToken;
use crate::errors::{ConfigurationError, DataSetError, ErrorInfo, NodeflowError, RunCancelled};
use crate::events::{EventSink, NoOpEventSink};
use crate::io::{DataCatalog, DataSet, DefaultDataSetFactory, SharedMemoryDataSet, SharedMemoryStore};
use crate::pipeline::Pipeline;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tracing::info;

/// Runs each layer's nodes concurrently, at most `max_workers` at a time,
/// and waits for the whole layer before starting the next one.
///
/// Intermediate values live in a [`SharedMemoryStore`] owned by a dedicated
/// thread, so nodes in later layers see what earlier layers saved. Data
/// sets that cannot be handed to workers fail the run before any node
/// starts.
#[derive(Clone)]
pub struct ParallelRunner {
    max_workers: usize,
    sink: Arc<dyn EventSink>,
    cancel: Option<Arc<CancellationToken>>,
}

impl ParallelRunner {
    /// Runner name.
    pub const NAME: &'static str = "ParallelRunner";

    /// Creates a runner. `None` uses the available parallelism of the host.
    pub fn new(max_workers: Option<usize>) -> Result<Self, ConfigurationError> {
        let max_workers = match max_workers {
            Some(0) => {
                return Err(ConfigurationError::new(
                    "max_workers should be positive, got 0",
                )
                .with_error_info(
                    ErrorInfo::new("RUNNER-WORKERS")
                        .with_fix_hint("Pass at least one worker or omit the option."),
                ))
            }
            Some(n) => n,
            None => std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
        };
        Ok(Self {
            max_workers,
            sink: Arc::new(NoOpEventSink),
            cancel: None,
        })
    }

    /// Maximum number of nodes running at once.
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.max_workers
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

    fn validate_transferable(pipeline: &Pipeline, catalog: &DataCatalog) -> Result<(), DataSetError> {
        let data_sets: BTreeSet<String> = pipeline
            .data_sets()
            .into_iter()
            .filter(|name| catalog.get(name).is_some_and(|ds| !ds.is_transferable()))
            .collect();
        if data_sets.is_empty() {
            Ok(())
        } else {
            Err(DataSetError::NotTransferable { data_sets })
        }
    }

    async fn execute(&self, run: &Arc<RunState>, pipeline: &Pipeline) -> Result<(), NodeflowError> {
        for layer in pipeline.layers() {
            let mut workers: JoinSet<Result<(), NodeflowError>> = JoinSet::new();
            let mut failure: Option<NodeflowError> = None;

            for node in layer {
                while workers.len() >= self.max_workers {
                    match workers.join_next().await {
                        Some(joined) => record(&mut failure, joined),
                        None => break,
                    }
                }
                if failure.is_some() {
                    break;
                }
                if let Some(cancelled) = run.cancelled() {
                    failure = Some(cancelled.into());
                    break;
                }
                if run.skip_if_complete(node) {
                    continue;
                }

                let node = node.clone();
                let run = Arc::clone(run);
                workers.spawn_blocking(move || run.execute_node(&node));
            }

            // In-flight nodes always finish; their outputs are kept.
            while let Some(joined) = workers.join_next().await {
                record(&mut failure, joined);
            }
            if let Some(err) = failure {
                return Err(err);
            }
        }

        match run.cancelled() {
            Some(cancelled) => Err(cancelled.into()),
            None => Ok(()),
        }
    }
}

/// Keeps the first failure of a layer.
fn record(failure: &mut Option<NodeflowError>, joined: Result<Result<(), NodeflowError>, JoinError>) {
    let err = match joined {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err,
        Err(join_err) => RunCancelled {
            reason: format!("worker task did not complete: {join_err}"),
        }
        .into(),
    };
    if failure.is_none() {
        *failure = Some(err);
    }
}

impl std::fmt::Debug for ParallelRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelRunner")
            .field("max_workers", &self.max_workers)
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

#[async_trait]
impl Runner for ParallelRunner {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(
        &self,
        pipeline: &Pipeline,
        catalog: &DataCatalog,
        only_missing: bool,
    ) -> Result<RunResult, NodeflowError> {
        Self::validate_transferable(pipeline, catalog)?;

        let store = SharedMemoryStore::start()?;
        let factory: DefaultDataSetFactory = Arc::new(move |name: &str| -> Arc<dyn DataSet> {
            Arc::new(SharedMemoryDataSet::new(name, Arc::clone(&store)))
        });

        info!(
            "Using {} with {} workers for parallel execution",
            Self::NAME,
            self.max_workers
        );
        let run = Arc::new(RunState::begin(
            Self::NAME,
            pipeline,
            catalog,
            only_missing,
            factory,
            Arc::clone(&self.sink),
            self.cancel.clone(),
        )?);
        let outcome = self.execute(&run, pipeline).await;
        run.finish(pipeline, outcome)
    }
}
