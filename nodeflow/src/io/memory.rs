//! In-process data set for intermediate values.

use super::core::{value_kind, DataSet};
use crate::errors::DataSetError;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;

/// Holds a value directly in memory, with no persistence.
///
/// Runners create one lazily for every pipeline data set the catalog does
/// not know about; `release()` drops the held value once no remaining node
/// reads it.
#[derive(Debug, Default)]
pub struct MemoryDataSet {
    data: RwLock<Option<Value>>,
}

impl MemoryDataSet {
    /// Creates an empty memory data set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a memory data set already holding `data`.
    #[must_use]
    pub fn with_data(data: Value) -> Self {
        Self {
            data: RwLock::new(Some(data)),
        }
    }
}

impl DataSet for MemoryDataSet {
    fn type_name(&self) -> &'static str {
        "MemoryDataSet"
    }

    fn describe(&self) -> BTreeMap<String, Value> {
        let mut desc = BTreeMap::new();
        if let Some(data) = self.data.read().as_ref() {
            desc.insert("data".to_string(), Value::String(value_kind(data).to_string()));
        }
        desc
    }

    fn load(&self) -> Result<Value, DataSetError> {
        let data = self.data.read().clone();
        data.ok_or_else(|| DataSetError::empty(self.label()))
    }

    fn save(&self, data: Value) -> Result<(), DataSetError> {
        *self.data.write() = Some(data);
        Ok(())
    }

    fn exists(&self) -> Result<bool, DataSetError> {
        Ok(self.data.read().is_some())
    }

    fn release(&self) {
        *self.data.write() = None;
    }
}
