//! Maps catalog `type` identifiers to data set constructors.

use super::core::DataSet;
use super::local::{JsonCodec, JsonLocalDataSet, TextCodec, TextLocalDataSet};
use super::memory::MemoryDataSet;
use super::version::{VersionSelector, VersionedPath};
use crate::errors::DataSetError;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a factory needs to build one catalog entry.
#[derive(Debug, Clone, Default)]
pub struct DataSetConfig {
    /// Catalog name of the entry.
    pub name: String,
    /// The `type` identifier.
    pub type_name: String,
    /// Backend parameters (the entry minus `type`, `versioned`, `layer` and
    /// `credentials`).
    pub params: Map<String, Value>,
    /// Resolved credentials, if the entry references any.
    pub credentials: Option<Map<String, Value>>,
    /// Version pins; `Some` iff the entry is versioned.
    pub version: Option<VersionSelector>,
    /// Directory relative file paths are resolved against.
    pub base_path: Option<PathBuf>,
}

impl DataSetConfig {
    /// Creates a config for `name` of the given type.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    /// Adds a backend parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Enables versioning with the given pins.
    #[must_use]
    pub fn with_version(mut self, selector: VersionSelector) -> Self {
        self.version = Some(selector);
        self
    }

    /// Sets the base directory for relative paths.
    #[must_use]
    pub fn with_base_path(mut self, base: impl Into<PathBuf>) -> Self {
        self.base_path = Some(base.into());
        self
    }

    /// Returns the required `filepath` parameter, resolved against the base
    /// directory when relative.
    pub fn filepath(&self) -> Result<PathBuf, DataSetError> {
        let raw = self
            .params
            .get("filepath")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                DataSetError::invalid_config(&self.name, "`filepath` must be a string")
            })?;
        let path = PathBuf::from(raw);
        match &self.base_path {
            Some(base) if path.is_relative() => Ok(base.join(path)),
            _ => Ok(path),
        }
    }

    /// Returns an optional boolean parameter.
    pub fn bool_param(&self, key: &str, default: bool) -> Result<bool, DataSetError> {
        match self.params.get(key) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(DataSetError::invalid_config(
                &self.name,
                format!("`{key}` must be a boolean"),
            )),
        }
    }

    /// Builds the path resolver for a file-backed entry.
    pub fn versioned_path(&self) -> Result<VersionedPath, DataSetError> {
        let filepath = self.filepath()?;
        Ok(match &self.version {
            Some(selector) => VersionedPath::versioned(filepath, selector.clone()),
            None => VersionedPath::unversioned(filepath),
        })
    }
}

/// Constructor registered for one data set type.
pub type DataSetFactory =
    Arc<dyn Fn(&DataSetConfig) -> Result<Arc<dyn DataSet>, DataSetError> + Send + Sync>;

/// Registry of data set types available to catalog configuration.
#[derive(Clone, Default)]
pub struct DataSetRegistry {
    factories: HashMap<String, DataSetFactory>,
}

impl DataSetRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in types registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("MemoryDataSet", |config| {
            let data_set = match config.params.get("data") {
                Some(data) => MemoryDataSet::with_data(data.clone()),
                None => MemoryDataSet::new(),
            };
            Ok(Arc::new(data_set))
        });
        registry.register("JSONLocalDataSet", |config| {
            let codec = JsonCodec {
                pretty: config.bool_param("pretty", false)?,
            };
            Ok(Arc::new(JsonLocalDataSet::with_path(config.versioned_path()?, codec)))
        });
        registry.register("TextLocalDataSet", |config| {
            Ok(Arc::new(TextLocalDataSet::with_path(config.versioned_path()?, TextCodec)))
        });
        registry
    }

    /// Registers (or replaces) a type.
    pub fn register<F>(&mut self, type_name: impl Into<String>, factory: F)
    where
        F: Fn(&DataSetConfig) -> Result<Arc<dyn DataSet>, DataSetError> + Send + Sync + 'static,
    {
        self.factories.insert(type_name.into(), Arc::new(factory));
    }

    /// Whether a type is registered.
    #[must_use]
    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Registered type identifiers, sorted.
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Builds a data set from its configuration.
    pub fn create(&self, config: &DataSetConfig) -> Result<Arc<dyn DataSet>, DataSetError> {
        let factory = self.factories.get(&config.type_name).ok_or_else(|| {
            DataSetError::invalid_config(
                &config.name,
                format!(
                    "DataSet type '{}' is not registered. Known types: {}",
                    config.type_name,
                    self.types().join(", ")
                ),
            )
        })?;
        factory(config)
    }
}

impl fmt::Debug for DataSetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSetRegistry")
            .field("types", &self.types())
            .finish()
    }
}
