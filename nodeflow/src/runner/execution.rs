//! Per-run bookkeeping shared by every runner.

use super::RunResult;
use crate::cancellation::CancellationToken;
use crate::errors::{NodeExecutionError, NodeflowError, RunCancelled, UnsatisfiedInputsError};
use crate::events::{
    EventSink, NODE_COMPLETED, NODE_FAILED, NODE_SKIPPED, NODE_STARTED, PIPELINE_COMPLETED,
    PIPELINE_FAILED, PIPELINE_STARTED,
};
use crate::io::{DataCatalog, DefaultDataSetFactory};
use crate::pipeline::{Node, Pipeline};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Counts remaining readers of intermediate data sets and releases each
/// one after its last reader finished.
///
/// Intermediates whose readers are all skipped are released as soon as
/// their producer saved them.
#[derive(Debug, Default)]
struct ReleaseTracker {
    remaining: HashMap<String, usize>,
    unread: HashSet<String>,
}

impl ReleaseTracker {
    fn new(nodes: &[&Node], pipeline: &Pipeline) -> Self {
        // Free inputs and outputs stay in place for the caller.
        let protected: BTreeSet<String> = pipeline
            .inputs()
            .into_iter()
            .chain(pipeline.outputs())
            .collect();
        let mut remaining = HashMap::new();
        for node in nodes {
            let distinct: HashSet<&String> = node.inputs().iter().collect();
            for input in distinct {
                if !protected.contains(input) {
                    *remaining.entry(input.clone()).or_insert(0) += 1;
                }
            }
        }
        let unread = nodes
            .iter()
            .flat_map(|node| node.outputs())
            .filter(|output| !protected.contains(output) && !remaining.contains_key(output))
            .collect();
        Self { remaining, unread }
    }

    /// Returns the data sets `node` touched that nobody reads any more.
    fn finished(&mut self, node: &Node) -> Vec<String> {
        let distinct: HashSet<&String> = node.inputs().iter().collect();
        let mut released = Vec::new();
        for input in distinct {
            if let Some(count) = self.remaining.get_mut(input) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.remaining.remove(input);
                    released.push(input.clone());
                }
            }
        }
        for output in node.outputs() {
            if self.unread.remove(&output) {
                released.push(output);
            }
        }
        released
    }
}

/// State of one pipeline run.
///
/// Shared by reference with parallel workers, so everything mutable is
/// behind a lock or an atomic.
pub(crate) struct RunState {
    run_id: Uuid,
    runner: &'static str,
    catalog: DataCatalog,
    skipped: HashSet<String>,
    total: usize,
    completed: AtomicUsize,
    tracker: Mutex<ReleaseTracker>,
    sink: Arc<dyn EventSink>,
    cancel: Option<Arc<CancellationToken>>,
    started: Instant,
}

impl RunState {
    /// Checks free inputs, prepares the run's catalog and decides which
    /// nodes `only_missing` skips.
    pub(crate) fn begin(
        runner: &'static str,
        pipeline: &Pipeline,
        catalog: &DataCatalog,
        only_missing: bool,
        factory: DefaultDataSetFactory,
        sink: Arc<dyn EventSink>,
        cancel: Option<Arc<CancellationToken>>,
    ) -> Result<Self, NodeflowError> {
        let missing: BTreeSet<String> = pipeline
            .inputs()
            .into_iter()
            .filter(|name| !catalog.contains(name))
            .collect();
        if !missing.is_empty() {
            return Err(UnsatisfiedInputsError { missing }.into());
        }

        let mut run_catalog = catalog.shallow_copy();
        let unregistered: Vec<String> = pipeline
            .data_sets()
            .into_iter()
            .filter(|name| !catalog.contains(name))
            .collect();
        run_catalog.set_internal(unregistered, factory);

        let mut skipped = HashSet::new();
        if only_missing {
            for node in pipeline.nodes() {
                let outputs = node.outputs();
                if outputs.is_empty() {
                    continue;
                }
                let mut all_exist = true;
                for output in &outputs {
                    if !run_catalog.exists(output)? {
                        all_exist = false;
                        break;
                    }
                }
                if all_exist {
                    skipped.insert(node.name());
                }
            }
        }

        let to_run: Vec<&Node> = pipeline
            .nodes()
            .iter()
            .filter(|n| !skipped.contains(&n.name()))
            .collect();
        let tracker = ReleaseTracker::new(&to_run, pipeline);

        let state = Self {
            run_id: Uuid::new_v4(),
            runner,
            catalog: run_catalog,
            total: to_run.len(),
            skipped,
            completed: AtomicUsize::new(0),
            tracker: Mutex::new(tracker),
            sink,
            cancel,
            started: Instant::now(),
        };
        debug!(
            run_id = %state.run_id,
            runner = state.runner,
            nodes = pipeline.len(),
            skipped = state.skipped.len(),
            "Starting pipeline run"
        );
        state.sink.emit(
            PIPELINE_STARTED,
            Some(json!({
                "run_id": state.run_id.to_string(),
                "runner": state.runner,
                "nodes": pipeline.len(),
            })),
        );
        Ok(state)
    }

    /// The run's catalog copy.
    pub(crate) fn catalog(&self) -> &DataCatalog {
        &self.catalog
    }

    /// Returns the cancellation error once the token fired.
    pub(crate) fn cancelled(&self) -> Option<RunCancelled> {
        let token = self.cancel.as_ref()?;
        token.is_cancelled().then(|| RunCancelled {
            reason: token.reason().unwrap_or_else(|| "cancelled".to_string()),
        })
    }

    /// Reports and returns `true` when `only_missing` skips this node.
    pub(crate) fn skip_if_complete(&self, node: &Node) -> bool {
        let name = node.name();
        if !self.skipped.contains(&name) {
            return false;
        }
        info!("Skipping node: {node} (all outputs exist)");
        self.sink.emit(NODE_SKIPPED, Some(json!({ "node": name })));
        true
    }

    /// Loads inputs, runs the node, saves outputs and releases data sets
    /// nobody reads any more.
    pub(crate) fn execute_node(&self, node: &Node) -> Result<(), NodeflowError> {
        let name = node.name();
        self.sink.emit(NODE_STARTED, Some(json!({ "node": name })));
        let start = Instant::now();

        if let Err(err) = self.run_node(node) {
            error!("Node {node} failed: {err}");
            self.sink.emit(
                NODE_FAILED,
                Some(json!({ "node": name, "error": err.to_string() })),
            );
            return Err(err);
        }

        let released = self.tracker.lock().finished(node);
        for data_set in released {
            debug!("Releasing `{data_set}`");
            self.catalog.release(&data_set);
        }

        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Completed {done} out of {} tasks", self.total);
        self.sink.emit(
            NODE_COMPLETED,
            Some(json!({
                "node": name,
                "duration_ms": start.elapsed().as_secs_f64() * 1000.0,
            })),
        );
        Ok(())
    }

    fn run_node(&self, node: &Node) -> Result<(), NodeflowError> {
        info!("Running node: {node}");
        let mut inputs = Vec::with_capacity(node.inputs().len());
        for input in node.inputs() {
            inputs.push(self.catalog.load(input)?);
        }

        let outputs = catch_unwind(AssertUnwindSafe(|| node.run(inputs))).map_err(|panic| {
            NodeExecutionError::new(node.name(), anyhow::anyhow!(panic_message(&*panic)))
        })??;

        for (name, value) in outputs {
            self.catalog.save(&name, value)?;
        }
        Ok(())
    }

    /// Emits the closing event and, on success, loads the free outputs.
    pub(crate) fn finish(
        &self,
        pipeline: &Pipeline,
        outcome: Result<(), NodeflowError>,
    ) -> Result<RunResult, NodeflowError> {
        let outcome = outcome.and_then(|()| self.collect_outputs(pipeline));
        let duration_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        match outcome {
            Ok(outputs) => {
                let result = RunResult {
                    run_id: self.run_id,
                    outputs,
                    nodes_run: self.completed.load(Ordering::SeqCst),
                    nodes_skipped: self.skipped.len(),
                    duration_ms,
                };
                self.sink.emit(
                    PIPELINE_COMPLETED,
                    Some(json!({
                        "run_id": self.run_id.to_string(),
                        "nodes_run": result.nodes_run,
                        "nodes_skipped": result.nodes_skipped,
                        "duration_ms": duration_ms,
                    })),
                );
                Ok(result)
            }
            Err(err) => {
                self.sink.emit(
                    PIPELINE_FAILED,
                    Some(json!({
                        "run_id": self.run_id.to_string(),
                        "error": err.to_string(),
                    })),
                );
                Err(err)
            }
        }
    }

    fn collect_outputs(&self, pipeline: &Pipeline) -> Result<BTreeMap<String, Value>, NodeflowError> {
        let mut outputs = BTreeMap::new();
        for name in pipeline.outputs() {
            let value = self.catalog.load(&name)?;
            outputs.insert(name, value);
        }
        Ok(outputs)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("node panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("node panicked: {msg}")
    } else {
        "node panicked".to_string()
    }
}
