//! Data set backed by user-supplied closures.

use super::core::DataSet;
use crate::errors::DataSetError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

type LoadFn = Box<dyn Fn() -> anyhow::Result<Value> + Send + Sync>;
type SaveFn = Box<dyn Fn(Value) -> anyhow::Result<()> + Send + Sync>;
type ExistsFn = Box<dyn Fn() -> anyhow::Result<bool> + Send + Sync>;
type ReleaseFn = Box<dyn Fn() + Send + Sync>;

/// A data set whose operations are plain closures.
///
/// The closures usually capture driver-side state (handles, clients,
/// buffers), so the parallel runner refuses these unless the data set is
/// explicitly marked [`transferable`](Self::transferable).
#[derive(Default)]
pub struct LambdaDataSet {
    load: Option<LoadFn>,
    save: Option<SaveFn>,
    exists: Option<ExistsFn>,
    release: Option<ReleaseFn>,
    transferable: bool,
}

impl LambdaDataSet {
    /// Creates a data set with no operations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the load closure.
    #[must_use]
    pub fn with_load<F>(mut self, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.load = Some(Box::new(f));
        self
    }

    /// Sets the save closure.
    #[must_use]
    pub fn with_save<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.save = Some(Box::new(f));
        self
    }

    /// Sets the exists closure.
    #[must_use]
    pub fn with_exists<F>(mut self, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.exists = Some(Box::new(f));
        self
    }

    /// Sets the release closure.
    #[must_use]
    pub fn with_release<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.release = Some(Box::new(f));
        self
    }

    /// Allows the parallel runner to use this data set.
    #[must_use]
    pub fn transferable(mut self) -> Self {
        self.transferable = true;
        self
    }
}

impl fmt::Debug for LambdaDataSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LambdaDataSet")
            .field("load", &self.load.is_some())
            .field("save", &self.save.is_some())
            .field("exists", &self.exists.is_some())
            .field("release", &self.release.is_some())
            .field("transferable", &self.transferable)
            .finish()
    }
}

impl DataSet for LambdaDataSet {
    fn type_name(&self) -> &'static str {
        "LambdaDataSet"
    }

    fn describe(&self) -> BTreeMap<String, Value> {
        let mut desc = BTreeMap::new();
        for (key, present) in [
            ("load", self.load.is_some()),
            ("save", self.save.is_some()),
            ("exists", self.exists.is_some()),
            ("release", self.release.is_some()),
        ] {
            if present {
                desc.insert(key.to_string(), Value::String("<closure>".to_string()));
            }
        }
        desc
    }

    fn load(&self) -> Result<Value, DataSetError> {
        let Some(load) = &self.load else {
            return Err(DataSetError::load(
                self.label(),
                anyhow::anyhow!("Cannot load data set. No `load` function provided."),
            ));
        };
        load().map_err(|e| DataSetError::load(self.label(), e))
    }

    fn save(&self, data: Value) -> Result<(), DataSetError> {
        let Some(save) = &self.save else {
            return Err(DataSetError::save(
                self.label(),
                anyhow::anyhow!("Cannot save to data set. No `save` function provided."),
            ));
        };
        save(data).map_err(|e| DataSetError::save(self.label(), e))
    }

    fn exists(&self) -> Result<bool, DataSetError> {
        match &self.exists {
            Some(exists) => exists().map_err(|e| DataSetError::exists(self.label(), e)),
            None => Ok(false),
        }
    }

    fn release(&self) {
        if let Some(release) = &self.release {
            release();
        }
    }

    fn is_transferable(&self) -> bool {
        self.transferable
    }
}
