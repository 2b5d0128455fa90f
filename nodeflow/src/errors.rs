//! Error types for the nodeflow engine.
//!
//! Each failure class of the engine has its own error type so callers can
//! match on what went wrong; [`NodeflowError`] aggregates all of them for the
//! top-level `run` paths.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for nodeflow operations.
#[derive(Debug, Error)]
pub enum NodeflowError {
    /// A malformed node or pipeline declaration.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// A cycle was detected in the pipeline graph.
    #[error("{0}")]
    CircularDependency(#[from] CircularDependencyError),

    /// Two nodes declare the same output.
    #[error("{0}")]
    OutputConflict(#[from] OutputConflictError),

    /// A data set name could not be resolved by the catalog.
    #[error("{0}")]
    DataSetNotFound(#[from] DataSetNotFoundError),

    /// A data set name is already registered.
    #[error("{0}")]
    DataSetAlreadyExists(#[from] DataSetAlreadyExistsError),

    /// A data set backend failed.
    #[error("{0}")]
    DataSet(#[from] DataSetError),

    /// A node computation failed.
    #[error("{0}")]
    NodeExecution(#[from] NodeExecutionError),

    /// Free pipeline inputs are missing from the catalog.
    #[error("{0}")]
    UnsatisfiedInputs(#[from] UnsatisfiedInputsError),

    /// The run was cancelled before completion.
    #[error("{0}")]
    Cancelled(#[from] RunCancelled),

    /// Project configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PipelineError> for NodeflowError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Configuration(e) => Self::Configuration(e),
            PipelineError::CircularDependency(e) => Self::CircularDependency(e),
            PipelineError::OutputConflict(e) => Self::OutputConflict(e),
        }
    }
}

impl From<CatalogError> for NodeflowError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(e) => Self::DataSetNotFound(e),
            CatalogError::AlreadyExists(e) => Self::DataSetAlreadyExists(e),
            CatalogError::DataSet(e) => Self::DataSet(e),
        }
    }
}

/// Diagnostic metadata attached to structural errors.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Error code (e.g., "PIPELINE-CYCLE").
    pub code: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info with the given code.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Errors produced while building or composing a pipeline.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// A malformed node or pipeline declaration.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),
    /// A dependency cycle.
    #[error("{0}")]
    CircularDependency(#[from] CircularDependencyError),
    /// Duplicate outputs across nodes.
    #[error("{0}")]
    OutputConflict(#[from] OutputConflictError),
}

/// Error raised for malformed node and pipeline declarations.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ConfigurationError {
    /// The error message.
    pub message: String,
    /// Names of the nodes involved, if any.
    pub nodes: Vec<String>,
    /// Optional diagnostic info.
    pub error_info: Option<ErrorInfo>,
}

impl ConfigurationError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            nodes: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the nodes involved.
    #[must_use]
    pub fn with_nodes(mut self, nodes: Vec<String>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Sets the diagnostic info.
    #[must_use]
    pub fn with_error_info(mut self, info: ErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }
}

/// Error raised when a cycle is detected in the pipeline graph.
#[derive(Debug, Clone, Error)]
#[error("Circular dependencies exist among these nodes: {}", cycle_path.join(" -> "))]
pub struct CircularDependencyError {
    /// The nodes forming the cycle; the first node is repeated at the end.
    pub cycle_path: Vec<String>,
    /// Diagnostic info.
    pub error_info: ErrorInfo,
}

impl CircularDependencyError {
    /// Creates a new circular dependency error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ErrorInfo::new("PIPELINE-CYCLE")
            .with_fix_hint("Remove one of the data set links in the cycle to break it.");
        Self {
            cycle_path,
            error_info: info,
        }
    }
}

/// Error raised when more than one node declares the same output.
#[derive(Debug, Clone, Error)]
#[error("Output(s) {} are returned by more than one node. Node outputs must be unique.", format_names(outputs))]
pub struct OutputConflictError {
    /// The conflicting output names.
    pub outputs: BTreeSet<String>,
    /// Diagnostic info.
    pub error_info: ErrorInfo,
}

impl OutputConflictError {
    /// Creates a new output conflict error.
    #[must_use]
    pub fn new(outputs: BTreeSet<String>) -> Self {
        Self {
            outputs,
            error_info: ErrorInfo::new("PIPELINE-OUTPUT-CONFLICT")
                .with_fix_hint("Rename the outputs so that each is produced by a single node."),
        }
    }
}

/// Errors produced by catalog lookups and registration.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Unknown data set name.
    #[error("{0}")]
    NotFound(#[from] DataSetNotFoundError),
    /// Duplicate registration.
    #[error("{0}")]
    AlreadyExists(#[from] DataSetAlreadyExistsError),
    /// Backend failure.
    #[error("{0}")]
    DataSet(#[from] DataSetError),
}

/// Error raised when a data set name is not registered in the catalog.
#[derive(Debug, Clone, Error)]
#[error("DataSet '{name}' not found in the catalog")]
pub struct DataSetNotFoundError {
    /// The missing name.
    pub name: String,
}

impl DataSetNotFoundError {
    /// Creates a new not-found error.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Error raised when registering a name that is already in the catalog.
#[derive(Debug, Clone, Error)]
#[error("DataSet '{name}' has already been registered")]
pub struct DataSetAlreadyExistsError {
    /// The duplicate name.
    pub name: String,
}

impl DataSetAlreadyExistsError {
    /// Creates a new already-exists error.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Errors raised by data set backends.
#[derive(Debug, Error)]
pub enum DataSetError {
    /// Loading failed.
    #[error("Failed while loading data from data set {data_set}.\n{source}")]
    Load {
        /// Description of the data set.
        data_set: String,
        /// The underlying failure.
        source: anyhow::Error,
    },

    /// Saving failed.
    #[error("Failed while saving data to data set {data_set}.\n{source}")]
    Save {
        /// Description of the data set.
        data_set: String,
        /// The underlying failure.
        source: anyhow::Error,
    },

    /// The existence check failed.
    #[error("Failed during exists check for data set {data_set}.\n{source}")]
    Exists {
        /// Description of the data set.
        data_set: String,
        /// The underlying failure.
        source: anyhow::Error,
    },

    /// A memory data set was loaded before anything was saved to it.
    #[error("Data for {data_set} has not been saved yet.")]
    Empty {
        /// Description of the data set.
        data_set: String,
    },

    /// Data sets whose values cannot be copied to parallel workers.
    #[error("The following data sets cannot be transferred to parallel workers: {}", format_names(data_sets))]
    NotTransferable {
        /// The offending names.
        data_sets: BTreeSet<String>,
    },

    /// A node returned a different number or shape of outputs than declared.
    #[error("Node '{node}' returned {actual}, but declared {expected}")]
    OutputArity {
        /// The node identity.
        node: String,
        /// What the node declared.
        expected: String,
        /// What the node returned.
        actual: String,
    },

    /// Version resolution failed.
    #[error("{message} (data set {data_set})")]
    Versioning {
        /// Description of the data set.
        data_set: String,
        /// Explanation.
        message: String,
    },

    /// A catalog entry could not be turned into a data set.
    #[error("An exception occurred when parsing config for DataSet '{data_set}':\n{message}")]
    InvalidConfig {
        /// The catalog name.
        data_set: String,
        /// Explanation.
        message: String,
    },
}

impl DataSetError {
    /// Wraps a load failure.
    pub fn load(data_set: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Load {
            data_set: data_set.into(),
            source: source.into(),
        }
    }

    /// Wraps a save failure.
    pub fn save(data_set: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Save {
            data_set: data_set.into(),
            source: source.into(),
        }
    }

    /// Wraps an exists failure.
    pub fn exists(data_set: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Exists {
            data_set: data_set.into(),
            source: source.into(),
        }
    }

    /// Creates an empty-data error.
    pub fn empty(data_set: impl Into<String>) -> Self {
        Self::Empty {
            data_set: data_set.into(),
        }
    }

    /// Prefixes the data set description with the catalog `name` it is
    /// registered under.
    #[must_use]
    pub fn in_catalog(mut self, name: &str) -> Self {
        match &mut self {
            Self::Load { data_set, .. }
            | Self::Save { data_set, .. }
            | Self::Exists { data_set, .. }
            | Self::Empty { data_set }
            | Self::Versioning { data_set, .. } => {
                *data_set = format!("'{name}' ({data_set})");
            }
            Self::NotTransferable { .. } | Self::OutputArity { .. } | Self::InvalidConfig { .. } => {}
        }
        self
    }

    /// Creates an invalid-config error.
    pub fn invalid_config(data_set: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            data_set: data_set.into(),
            message: message.into(),
        }
    }
}

/// Error raised when a node's computation fails.
///
/// The source error is kept intact; only the node identity is attached.
#[derive(Debug, Error)]
#[error("Node '{node}' failed: {source}")]
pub struct NodeExecutionError {
    /// The failing node's identity.
    pub node: String,
    /// The computation's error.
    pub source: anyhow::Error,
}

impl NodeExecutionError {
    /// Creates a new node execution error.
    pub fn new(node: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            node: node.into(),
            source,
        }
    }
}

/// Error raised when free pipeline inputs are not in the catalog.
#[derive(Debug, Clone, Error)]
#[error("Pipeline input(s) {} not found in the DataCatalog", format_names(missing))]
pub struct UnsatisfiedInputsError {
    /// The missing inputs.
    pub missing: BTreeSet<String>,
}

/// Error raised when a run stops because of a cancellation request.
#[derive(Debug, Clone, Error)]
#[error("Pipeline run cancelled: {reason}")]
pub struct RunCancelled {
    /// The cancellation reason.
    pub reason: String,
}

/// Errors raised while loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No configuration paths were supplied.
    #[error("`conf_paths` must contain at least one path to load configuration files from.")]
    NoPaths,

    /// No glob patterns were supplied.
    #[error("`patterns` must contain at least one glob pattern to match config filenames against.")]
    NoPatterns,

    /// A configuration path is not a directory.
    #[error("Given configuration path either does not exist or is not a valid directory: {}", path.display())]
    InvalidPath {
        /// The offending path.
        path: PathBuf,
    },

    /// Two files in the same configuration path share top-level keys.
    #[error("Duplicate keys found in {} and:\n- {}", file.display(), duplicates.join("\n- "))]
    DuplicateKeys {
        /// The file being loaded.
        file: PathBuf,
        /// `other_file: key, key` entries.
        duplicates: Vec<String>,
    },

    /// No files matched the patterns.
    #[error("{0}")]
    Missing(#[from] MissingConfigError),

    /// A file could not be parsed.
    #[error("Failed to parse configuration file {}: {message}", path.display())]
    Parse {
        /// The file.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// A configuration file does not contain a mapping at the top level.
    #[error("Configuration file {} must contain a mapping at the top level", path.display())]
    NotAMapping {
        /// The file.
        path: PathBuf,
    },

    /// An invalid glob pattern.
    #[error("Invalid glob pattern '{pattern}': {message}")]
    Pattern {
        /// The pattern.
        pattern: String,
        /// Compiler message.
        message: String,
    },

    /// IO error while scanning or reading configuration.
    #[error("IO error reading configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Error raised when no configuration files match the requested patterns.
#[derive(Debug, Clone, Error)]
#[error("No files found in {paths:?} matching the glob pattern(s): {patterns:?}")]
pub struct MissingConfigError {
    /// The searched configuration paths.
    pub paths: Vec<String>,
    /// The requested patterns.
    pub patterns: Vec<String>,
}

pub(crate) fn format_names(names: &BTreeSet<String>) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
    format!("{{{}}}", quoted.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_info_creation() {
        let info = ErrorInfo::new("TEST-001")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("node", "my_node");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("node"), Some(&"my_node".to_string()));
    }

    #[test]
    fn test_circular_dependency_message() {
        let err = CircularDependencyError::new(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]);

        assert!(err.to_string().contains("a -> b -> a"));
        assert_eq!(err.error_info.code, "PIPELINE-CYCLE");
    }

    #[test]
    fn test_output_conflict_lists_names_sorted() {
        let outputs: BTreeSet<String> = ["z", "a"].iter().map(|s| (*s).to_string()).collect();
        let err = OutputConflictError::new(outputs);
        assert!(err.to_string().starts_with("Output(s) {'a', 'z'}"));
    }

    #[test]
    fn test_unsatisfied_inputs_message() {
        let err = UnsatisfiedInputsError {
            missing: std::iter::once("raw".to_string()).collect(),
        };
        assert_eq!(
            err.to_string(),
            "Pipeline input(s) {'raw'} not found in the DataCatalog"
        );
    }

    #[test]
    fn test_invalid_path_message() {
        let err = ConfigError::InvalidPath {
            path: PathBuf::from("conf/nonexistent"),
        };
        assert!(err
            .to_string()
            .starts_with("Given configuration path either does not exist or is not a valid directory:"));
    }

    #[test]
    fn test_pipeline_error_converts_to_top_level() {
        let err: NodeflowError = PipelineError::from(CircularDependencyError::new(vec![])).into();
        assert!(matches!(err, NodeflowError::CircularDependency(_)));
    }

    #[test]
    fn test_load_error_keeps_source_message() {
        let err = DataSetError::load("JSONLocalDataSet(filepath=x.json)", anyhow::anyhow!("boom"));
        let msg = err.to_string();
        assert!(msg.starts_with("Failed while loading data from data set JSONLocalDataSet"));
        assert!(msg.ends_with("boom"));
    }

    #[test]
    fn test_in_catalog_names_the_entry() {
        let err = DataSetError::empty("MemoryDataSet()").in_catalog("seed");
        assert_eq!(err.to_string(), "Data for 'seed' (MemoryDataSet()) has not been saved yet.");

        let err = DataSetError::load("JSONLocalDataSet(filepath=x.json)", anyhow::anyhow!("boom"))
            .in_catalog("raw");
        assert!(err
            .to_string()
            .starts_with("Failed while loading data from data set 'raw' (JSONLocalDataSet"));
    }
}
