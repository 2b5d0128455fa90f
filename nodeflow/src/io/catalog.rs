//! The data catalog: logical names mapped onto data sets.

use super::core::DataSet;
use super::memory::MemoryDataSet;
use super::registry::{DataSetConfig, DataSetRegistry};
use super::version::VersionSelector;
use crate::errors::{
    CatalogError, DataSetAlreadyExistsError, DataSetError, DataSetNotFoundError,
};
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Creates the backing data set for an internal (unregistered) name.
pub type DefaultDataSetFactory = Arc<dyn Fn(&str) -> Arc<dyn DataSet> + Send + Sync>;

/// Factory backing internal names with [`MemoryDataSet`]s.
#[must_use]
pub fn memory_factory() -> DefaultDataSetFactory {
    Arc::new(|_: &str| -> Arc<dyn DataSet> { Arc::new(MemoryDataSet::new()) })
}

/// Options applied while building a catalog from configuration.
#[derive(Debug, Clone, Default)]
pub struct CatalogOptions {
    /// Pinned load versions by data set name.
    pub load_versions: BTreeMap<String, String>,
    /// Save version shared by every versioned data set of a run.
    pub save_version: Option<String>,
    /// Directory relative file paths are resolved against.
    pub base_path: Option<PathBuf>,
}

/// Registry of named data sets that mediates every load and save.
///
/// Registrations live in a concurrent map so a catalog can be shared across
/// parallel workers by reference. Names flagged internal get a data set from
/// the default factory the first time they are used.
pub struct DataCatalog {
    data_sets: DashMap<String, Arc<dyn DataSet>>,
    internal: HashSet<String>,
    default_factory: DefaultDataSetFactory,
    layers: BTreeMap<String, BTreeSet<String>>,
}

impl Default for DataCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl DataCatalog {
    /// Creates an empty catalog whose internal data sets are in memory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data_sets: DashMap::new(),
            internal: HashSet::new(),
            default_factory: memory_factory(),
            layers: BTreeMap::new(),
        }
    }

    /// Creates a catalog from the given registrations.
    pub fn with_data_sets<I>(data_sets: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = (String, Arc<dyn DataSet>)>,
    {
        let catalog = Self::new();
        for (name, data_set) in data_sets {
            catalog.add(name, data_set)?;
        }
        Ok(catalog)
    }

    /// Builds a catalog from `name -> entry` configuration.
    ///
    /// Each entry needs a `type`; `versioned`, `layer` and `credentials` are
    /// consumed here and every other key is passed to the type's factory.
    pub fn from_config(
        config: &Map<String, Value>,
        credentials: &Map<String, Value>,
        registry: &DataSetRegistry,
        options: &CatalogOptions,
    ) -> Result<Self, CatalogError> {
        if let Some(unknown) = options
            .load_versions
            .keys()
            .find(|name| !config.contains_key(*name))
        {
            return Err(DataSetNotFoundError::new(unknown.clone()).into());
        }

        let mut catalog = Self::new();
        for (name, entry) in config {
            let Value::Object(entry) = entry else {
                return Err(DataSetError::invalid_config(
                    name,
                    "catalog entries must be tables of data set parameters",
                )
                .into());
            };
            let mut params = entry.clone();

            let type_name = match params.remove("type") {
                Some(Value::String(t)) => t,
                Some(_) => {
                    return Err(DataSetError::invalid_config(name, "`type` must be a string").into())
                }
                None => {
                    return Err(DataSetError::invalid_config(
                        name,
                        "`type` is missing from DataSet catalog configuration",
                    )
                    .into())
                }
            };

            let versioned = match params.remove("versioned") {
                None => false,
                Some(Value::Bool(v)) => v,
                Some(_) => {
                    return Err(
                        DataSetError::invalid_config(name, "`versioned` must be a boolean").into(),
                    )
                }
            };

            let layer = match params.remove("layer") {
                None => None,
                Some(Value::String(layer)) => Some(layer),
                Some(_) => {
                    return Err(DataSetError::invalid_config(name, "`layer` must be a string").into())
                }
            };

            let creds = match params.remove("credentials") {
                None => None,
                Some(Value::String(set)) => match credentials.get(&set) {
                    Some(Value::Object(values)) => Some(values.clone()),
                    _ => {
                        return Err(DataSetError::invalid_config(
                            name,
                            format!("Unable to find credentials '{set}': check your data catalog and credentials configuration."),
                        )
                        .into())
                    }
                },
                Some(Value::Object(inline)) => Some(inline),
                Some(_) => {
                    return Err(DataSetError::invalid_config(
                        name,
                        "`credentials` must name a credential set",
                    )
                    .into())
                }
            };

            let version = versioned.then(|| VersionSelector {
                load: options.load_versions.get(name).cloned(),
                save: options.save_version.clone(),
            });

            let data_set_config = DataSetConfig {
                name: name.clone(),
                type_name,
                params,
                credentials: creds,
                version,
                base_path: options.base_path.clone(),
            };
            let data_set = registry.create(&data_set_config)?;
            debug!(data_set = %name, "Registered {}", data_set.label());
            catalog.add(name.clone(), data_set)?;

            if let Some(layer) = layer {
                catalog.layers.entry(layer).or_default().insert(name.clone());
            }
        }
        Ok(catalog)
    }

    /// Registers a data set. Fails if the name is taken.
    pub fn add(&self, name: impl Into<String>, data_set: Arc<dyn DataSet>) -> Result<(), CatalogError> {
        let name = name.into();
        match self.data_sets.entry(name) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                Err(DataSetAlreadyExistsError::new(entry.key().clone()).into())
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(data_set);
                Ok(())
            }
        }
    }

    /// Registers a data set, replacing any existing registration.
    pub fn add_replace(&self, name: impl Into<String>, data_set: Arc<dyn DataSet>) {
        self.data_sets.insert(name.into(), data_set);
    }

    /// Registers memory data sets holding the given values.
    ///
    /// With `replace` they override existing registrations of the same name.
    pub fn add_feed_dict<I>(&self, values: I, replace: bool) -> Result<(), CatalogError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        for (name, value) in values {
            let data_set: Arc<dyn DataSet> = Arc::new(MemoryDataSet::with_data(value));
            if replace {
                self.add_replace(name, data_set);
            } else {
                self.add(name, data_set)?;
            }
        }
        Ok(())
    }

    /// Flags names as internal and sets the factory that backs them.
    pub fn set_internal<I>(&mut self, names: I, factory: DefaultDataSetFactory)
    where
        I: IntoIterator<Item = String>,
    {
        self.internal.extend(names);
        self.default_factory = factory;
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.data_sets.contains_key(name)
    }

    /// Returns the data set registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn DataSet>> {
        self.data_sets.get(name).map(|entry| Arc::clone(entry.value()))
    }

    fn resolve(&self, name: &str) -> Result<Arc<dyn DataSet>, CatalogError> {
        if let Some(data_set) = self.get(name) {
            return Ok(data_set);
        }
        if !self.internal.contains(name) {
            return Err(DataSetNotFoundError::new(name).into());
        }
        let entry = self
            .data_sets
            .entry(name.to_string())
            .or_insert_with(|| (self.default_factory)(name));
        Ok(Arc::clone(entry.value()))
    }

    /// Loads the value registered under `name`.
    pub fn load(&self, name: &str) -> Result<Value, CatalogError> {
        let data_set = self.resolve(name)?;
        debug!("Loading data from `{name}` ({})...", data_set.type_name());
        Ok(data_set.load().map_err(|e| e.in_catalog(name))?)
    }

    /// Saves a value under `name`.
    pub fn save(&self, name: &str, value: Value) -> Result<(), CatalogError> {
        let data_set = self.resolve(name)?;
        debug!("Saving data to `{name}` ({})...", data_set.type_name());
        Ok(data_set.save(value).map_err(|e| e.in_catalog(name))?)
    }

    /// Whether data is present under `name`. Unknown names report `false`.
    pub fn exists(&self, name: &str) -> Result<bool, DataSetError> {
        match self.get(name) {
            Some(data_set) => data_set.exists().map_err(|e| e.in_catalog(name)),
            None => Ok(false),
        }
    }

    /// Releases any data held for `name`.
    pub fn release(&self, name: &str) {
        if let Some(data_set) = self.get(name) {
            data_set.release();
        }
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.data_sets.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Returns a catalog sharing the same data set instances with an
    /// independent name mapping.
    #[must_use]
    pub fn shallow_copy(&self) -> Self {
        let data_sets = DashMap::new();
        for entry in &self.data_sets {
            data_sets.insert(entry.key().clone(), Arc::clone(entry.value()));
        }
        Self {
            data_sets,
            internal: self.internal.clone(),
            default_factory: Arc::clone(&self.default_factory),
            layers: self.layers.clone(),
        }
    }

    /// Data set names grouped by their configured `layer`.
    #[must_use]
    pub fn layers(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.layers
    }

    /// Logs every registration at info level.
    pub fn log_summary(&self) {
        for name in self.list() {
            if let Some(data_set) = self.get(&name) {
                info!("Catalog entry `{name}`: {}", data_set.label());
            }
        }
    }
}

impl fmt::Debug for DataCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataCatalog")
            .field("data_sets", &self.list())
            .field("internal", &self.internal.len())
            .field("layers", &self.layers)
            .finish()
    }
}
