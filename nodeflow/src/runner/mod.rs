//! Execution strategies.
//!
//! A [`Runner`] takes a validated [`Pipeline`] and a [`DataCatalog`], runs
//! every node in dependency order and returns the pipeline's free outputs.
//! Both built-in runners produce identical results for deterministic nodes:
//!
//! - [`SequentialRunner`] runs one node at a time in topological order
//! - [`ParallelRunner`] runs each layer on a bounded pool of blocking tasks

mod execution;
mod parallel;
mod sequential;

#[cfg(test)]
mod integration_tests;

pub use parallel::ParallelRunner;
pub use sequential::SequentialRunner;

use crate::errors::{ConfigurationError, ErrorInfo, NodeflowError};
use crate::io::DataCatalog;
use crate::pipeline::Pipeline;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Runner names accepted by [`create_runner`].
pub const RUNNER_NAMES: [&str; 2] = [SequentialRunner::NAME, ParallelRunner::NAME];

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Free pipeline outputs by name.
    pub outputs: BTreeMap<String, Value>,
    /// Nodes that ran.
    pub nodes_run: usize,
    /// Nodes skipped by `only_missing`.
    pub nodes_skipped: usize,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,
}

/// An execution strategy for pipelines.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Name used on the command line and in logs.
    fn name(&self) -> &'static str;

    /// Runs `pipeline` against `catalog`.
    ///
    /// The catalog itself is never modified: the run works on a shallow copy
    /// in which every unregistered pipeline data set is backed by an
    /// in-memory data set. With `only_missing`, nodes whose outputs all
    /// exist already are skipped.
    async fn run(
        &self,
        pipeline: &Pipeline,
        catalog: &DataCatalog,
        only_missing: bool,
    ) -> Result<RunResult, NodeflowError>;
}

/// Creates a runner by name.
///
/// `max_workers` only applies to the parallel runner.
pub fn create_runner(
    name: &str,
    max_workers: Option<usize>,
) -> Result<Box<dyn Runner>, ConfigurationError> {
    match name {
        SequentialRunner::NAME => Ok(Box::new(SequentialRunner::new())),
        ParallelRunner::NAME => Ok(Box::new(ParallelRunner::new(max_workers)?)),
        other => Err(ConfigurationError::new(format!(
            "Unknown runner '{other}'. Available runners: {}",
            RUNNER_NAMES.join(", ")
        ))
        .with_error_info(
            ErrorInfo::new("RUNNER-UNKNOWN").with_context_entry("runner", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_runner_by_name() {
        assert_eq!(create_runner("SequentialRunner", None).unwrap().name(), "SequentialRunner");
        assert_eq!(create_runner("ParallelRunner", Some(2)).unwrap().name(), "ParallelRunner");
    }

    #[test]
    fn test_create_runner_unknown_name() {
        let err = create_runner("ThreadRunner", None).err().unwrap();
        assert!(err.message.contains("Unknown runner 'ThreadRunner'"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(create_runner("ParallelRunner", Some(0)).is_err());
    }
}
