use crate::cancellation::CancellationToken;
use crate::config::ConfigLoader;
use crate::errors::{ConfigError, ConfigurationError, ErrorInfo, NodeflowError};
use crate::events::{EventSink, NoOpEventSink};
use crate::io::{generate_timestamp, CatalogOptions, DataCatalog, DataSetRegistry};
use crate::pipeline::Pipeline;
use crate::runner::{create_runner, ParallelRunner, RunResult, Runner, SequentialRunner};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Environment used when none is given.
pub const DEFAULT_ENV: &str = "local";

/// Name of the pipeline run when none is given.
pub const DEFAULT_PIPELINE: &str = "__default__";

const CATALOG_PATTERNS: [&str; 2] = ["catalog*", "catalog*/**"];
const CREDENTIALS_PATTERNS: [&str; 2] = ["credentials*", "credentials*/**"];
const PARAMETERS_PATTERNS: [&str; 2] = ["parameters*", "parameters*/**"];

/// What to run and how.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Registered pipeline to run; [`DEFAULT_PIPELINE`] when `None`.
    pub pipeline_name: Option<String>,
    /// Keep only nodes carrying one of these tags.
    pub tags: Vec<String>,
    /// Keep only these nodes.
    pub node_names: Vec<String>,
    /// Start from these nodes.
    pub from_nodes: Vec<String>,
    /// Stop after these nodes.
    pub to_nodes: Vec<String>,
    /// Runner name; [`SequentialRunner`] when `None`.
    pub runner: Option<String>,
    /// Worker limit for the parallel runner.
    pub max_workers: Option<usize>,
    /// Skip nodes whose outputs already exist.
    pub only_missing: bool,
    /// Version to load per versioned data set.
    pub load_versions: BTreeMap<String, String>,
}

/// A project on disk with its registered pipelines.
pub struct ProjectContext {
    project_path: PathBuf,
    env: String,
    registry: DataSetRegistry,
    pipelines: BTreeMap<String, Pipeline>,
    sink: Arc<dyn EventSink>,
    cancel: Option<Arc<CancellationToken>>,
}

impl ProjectContext {
    /// Creates a context for the project at `project_path`.
    ///
    /// `env` selects the overlay directory `conf/<env>`.
    pub fn new(project_path: impl Into<PathBuf>, env: Option<&str>) -> Self {
        Self {
            project_path: project_path.into(),
            env: env.unwrap_or(DEFAULT_ENV).to_string(),
            registry: DataSetRegistry::with_defaults(),
            pipelines: BTreeMap::new(),
            sink: Arc::new(NoOpEventSink),
            cancel: None,
        }
    }

    /// Replaces the data set registry.
    #[must_use]
    pub fn with_registry(mut self, registry: DataSetRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Registers a pipeline under `name`.
    #[must_use]
    pub fn with_pipeline(mut self, name: impl Into<String>, pipeline: Pipeline) -> Self {
        self.pipelines.insert(name.into(), pipeline);
        self
    }

    /// Sets the event sink handed to runners.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the cancellation token handed to runners.
    #[must_use]
    pub fn with_cancellation_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Project root.
    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    /// Active environment.
    pub fn env(&self) -> &str {
        &self.env
    }

    /// `conf/base` followed by `conf/<env>`.
    pub fn conf_paths(&self) -> Vec<PathBuf> {
        let conf = self.project_path.join("conf");
        vec![conf.join("base"), conf.join(&self.env)]
    }

    /// Loader over [`conf_paths`](Self::conf_paths).
    pub fn config_loader(&self) -> Result<ConfigLoader, ConfigError> {
        ConfigLoader::new(self.conf_paths())
    }

    /// Registered pipeline names.
    pub fn pipeline_names(&self) -> Vec<&str> {
        self.pipelines.keys().map(String::as_str).collect()
    }

    /// Looks up a registered pipeline.
    pub fn pipeline(&self, name: &str) -> Result<&Pipeline, ConfigurationError> {
        self.pipelines.get(name).ok_or_else(|| {
            ConfigurationError::new(format!("Failed to find the pipeline named '{name}'."))
                .with_error_info(
                    ErrorInfo::new("CONTEXT-PIPELINE")
                        .with_context_entry("pipeline", name)
                        .with_fix_hint(format!(
                            "Registered pipelines: {}",
                            self.pipeline_names().join(", ")
                        )),
                )
        })
    }

    /// Merged parameters. Missing parameter files yield an empty map.
    pub fn parameters(&self) -> Result<Map<String, Value>, ConfigError> {
        self.optional_config(&PARAMETERS_PATTERNS, "Parameters")
    }

    /// Merged credentials. Missing credential files yield an empty map.
    pub fn credentials(&self) -> Result<Map<String, Value>, ConfigError> {
        self.optional_config(&CREDENTIALS_PATTERNS, "Credentials")
    }

    fn optional_config(
        &self,
        patterns: &[&str],
        what: &str,
    ) -> Result<Map<String, Value>, ConfigError> {
        match self.config_loader()?.get(patterns) {
            Ok(config) => Ok(config),
            Err(ConfigError::Missing(err)) => {
                warn!("{what} not found in your project configuration: {err}");
                Ok(Map::new())
            }
            Err(err) => Err(err),
        }
    }

    /// Builds the catalog from project configuration.
    ///
    /// Parameters are fed in as `parameters` and `params:<key>`. Relative
    /// file paths resolve against the project root.
    pub fn catalog(
        &self,
        load_versions: &BTreeMap<String, String>,
        save_version: Option<String>,
    ) -> Result<DataCatalog, NodeflowError> {
        let loader = self.config_loader()?;
        let conf_catalog = loader.get(&CATALOG_PATTERNS)?;
        let conf_creds = self.credentials()?;
        let options = CatalogOptions {
            load_versions: load_versions.clone(),
            save_version,
            base_path: Some(self.project_path.clone()),
        };
        let catalog = DataCatalog::from_config(&conf_catalog, &conf_creds, &self.registry, &options)?;

        let parameters = self.parameters()?;
        let feed = parameters
            .iter()
            .map(|(key, value)| (format!("params:{key}"), value.clone()))
            .chain(std::iter::once((
                "parameters".to_string(),
                Value::Object(parameters.clone()),
            )));
        catalog.add_feed_dict(feed, true)?;
        Ok(catalog)
    }

    /// Applies the filters of `options` to the selected pipeline.
    pub fn filtered_pipeline(&self, options: &RunOptions) -> Result<Pipeline, NodeflowError> {
        let name = options.pipeline_name.as_deref().unwrap_or(DEFAULT_PIPELINE);
        let mut pipeline = self.pipeline(name)?.clone();

        if !options.tags.is_empty() {
            pipeline = pipeline.only_nodes_with_tags(&options.tags)?;
        }
        if !options.from_nodes.is_empty() {
            pipeline = pipeline.from_nodes(&options.from_nodes)?;
        }
        if !options.to_nodes.is_empty() {
            pipeline = pipeline.to_nodes(&options.to_nodes)?;
        }
        if !options.node_names.is_empty() {
            pipeline = pipeline.only_nodes(&options.node_names)?;
        }

        if pipeline.is_empty() {
            return Err(ConfigurationError::new(format!(
                "Pipeline '{name}' contains no nodes after applying the given filters."
            ))
            .with_error_info(ErrorInfo::new("CONTEXT-EMPTY-PIPELINE").with_fix_hint(
                "Check the --tag, --node, --from-nodes and --to-nodes options.",
            ))
            .into());
        }
        Ok(pipeline)
    }

    fn runner(&self, options: &RunOptions) -> Result<Box<dyn Runner>, ConfigurationError> {
        let name = options.runner.as_deref().unwrap_or(SequentialRunner::NAME);
        let runner: Box<dyn Runner> = match name {
            SequentialRunner::NAME => {
                let mut runner = SequentialRunner::new().with_event_sink(Arc::clone(&self.sink));
                if let Some(token) = &self.cancel {
                    runner = runner.with_cancellation_token(Arc::clone(token));
                }
                Box::new(runner)
            }
            ParallelRunner::NAME => {
                let mut runner = ParallelRunner::new(options.max_workers)?
                    .with_event_sink(Arc::clone(&self.sink));
                if let Some(token) = &self.cancel {
                    runner = runner.with_cancellation_token(Arc::clone(token));
                }
                Box::new(runner)
            }
            other => create_runner(other, options.max_workers)?,
        };
        Ok(runner)
    }

    /// Filters the pipeline, builds a fresh catalog and runs it.
    ///
    /// Every versioned data set saved during the run shares one version.
    pub async fn run(&self, options: &RunOptions) -> Result<RunResult, NodeflowError> {
        let runner = self.runner(options)?;
        let pipeline = self.filtered_pipeline(options)?;
        let save_version = generate_timestamp();
        let catalog = self.catalog(&options.load_versions, Some(save_version.clone()))?;
        catalog.log_summary();

        info!(
            env = %self.env,
            runner = runner.name(),
            save_version = %save_version,
            "Running {} node(s)",
            pipeline.len()
        );
        runner.run(&pipeline, &catalog, options.only_missing).await
    }
}

impl std::fmt::Debug for ProjectContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectContext")
            .field("project_path", &self.project_path)
            .field("env", &self.env)
            .field("pipelines", &self.pipeline_names())
            .field("registry", &self.registry)
            .finish()
    }
}
