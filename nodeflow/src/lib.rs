//! # Nodeflow
//!
//! A data-set driven pipeline engine.
//!
//! Pure computations are wrapped in [`Node`](pipeline::Node)s that name the
//! data sets they read and write. A [`Pipeline`](pipeline::Pipeline) derives
//! the dependency graph from those names, and a runner executes it against a
//! [`DataCatalog`](io::DataCatalog) that maps names to storage backends:
//!
//! - **Data sets**: memory, shared memory, local JSON/text files, versioning
//! - **Pipelines**: validation, Kahn layering, tag and name filtering
//! - **Runners**: sequential and bounded-parallel execution with identical results
//! - **Projects**: layered TOML/JSON configuration, credentials and parameters
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use nodeflow::prelude::*;
//! use serde_json::json;
//!
//! let pipeline = Pipeline::new(vec![
//!     node(func1("double", |v| Ok(json!(v.as_i64().unwrap_or(0) * 2))), ["raw"], "doubled")?,
//!     node(func1("inc", |v| Ok(json!(v.as_i64().unwrap_or(0) + 1))), ["doubled"], "result")?,
//! ])?;
//!
//! let catalog = DataCatalog::new();
//! catalog.add("raw", Arc::new(MemoryDataSet::with_data(json!(20))))?;
//!
//! let result = SequentialRunner::new().run(&pipeline, &catalog, false).await?;
//! assert_eq!(result.outputs["result"], json!(41));
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod io;
pub mod pipeline;
pub mod runner;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::ConfigLoader;
    pub use crate::context::{ProjectContext, RunOptions};
    pub use crate::errors::{
        CatalogError, ConfigError, ConfigurationError, DataSetError, NodeExecutionError,
        NodeflowError, PipelineError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::io::{
        DataCatalog, DataSet, DataSetConfig, DataSetRegistry, JsonLocalDataSet, LambdaDataSet,
        MemoryDataSet, TextLocalDataSet, VersionSelector,
    };
    pub use crate::pipeline::{
        func0, func1, func2, func3, func_n, node, variadic, Computation, Node, NodeOutputs,
        Pipeline,
    };
    pub use crate::runner::{create_runner, ParallelRunner, RunResult, Runner, SequentialRunner};
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_quick_start() {
        let pipeline = Pipeline::new(vec![
            node(func1("double", |v| Ok(json!(v.as_i64().unwrap_or(0) * 2))), ["raw"], "doubled")
                .unwrap(),
            node(func1("inc", |v| Ok(json!(v.as_i64().unwrap_or(0) + 1))), ["doubled"], "result")
                .unwrap(),
        ])
        .unwrap();

        let catalog = DataCatalog::new();
        catalog
            .add("raw", Arc::new(MemoryDataSet::with_data(json!(20))))
            .unwrap();

        let result = SequentialRunner::new()
            .run(&pipeline, &catalog, false)
            .await
            .unwrap();
        assert_eq!(result.outputs["result"], json!(41));
    }
}
