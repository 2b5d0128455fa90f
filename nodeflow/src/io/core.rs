//! The data set contract shared by every storage backend.

use super::version::{Version, VersionedPath};
use crate::errors::DataSetError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Capability contract for a single named piece of data.
///
/// Implementations know nothing about pipelines: the catalog maps logical
/// names onto instances and runners only ever talk to the catalog.
pub trait DataSet: Send + Sync + Debug {
    /// Returns the type identifier used in catalog configuration.
    fn type_name(&self) -> &'static str;

    /// Returns the backend parameters that identify this instance.
    fn describe(&self) -> BTreeMap<String, Value>;

    /// Loads the stored value.
    fn load(&self) -> Result<Value, DataSetError>;

    /// Stores a value.
    fn save(&self, data: Value) -> Result<(), DataSetError>;

    /// Checks whether data is present.
    ///
    /// Backends that cannot tell report `false`, so `only_missing` runs
    /// always recompute them.
    fn exists(&self) -> Result<bool, DataSetError> {
        Ok(false)
    }

    /// Drops any cached or held data.
    fn release(&self) {}

    /// Whether loaded values may be handed to parallel workers.
    fn is_transferable(&self) -> bool {
        true
    }

    /// Returns the versioning capability, if the backend has one.
    fn as_versioned(&self) -> Option<&dyn Versioned> {
        None
    }

    /// Human-readable label, e.g. `JSONLocalDataSet(filepath=a.json)`.
    fn label(&self) -> String {
        format_label(self.type_name(), &self.describe())
    }
}

/// Versioning capability composed by file-backed data sets.
///
/// Implementors only hand out their [`VersionedPath`]; resolution of load and
/// save targets is delegated to it.
pub trait Versioned {
    /// Returns the path resolver.
    fn versioned_path(&self) -> &VersionedPath;

    /// Lists the versions present on disk, oldest first.
    fn versions(&self) -> Result<Vec<Version>, DataSetError> {
        self.versioned_path().versions()
    }

    /// Returns the version a `load()` would read.
    fn resolve_load_version(&self) -> Result<Option<Version>, DataSetError> {
        self.versioned_path().resolve_load_version()
    }
}

pub(crate) fn format_label(type_name: &str, params: &BTreeMap<String, Value>) -> String {
    let rendered: Vec<String> = params
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| match v {
            Value::String(s) => format!("{k}={s}"),
            other => format!("{k}={other}"),
        })
        .collect();
    format!("{type_name}({})", rendered.join(", "))
}

/// Returns a short type tag for a value, used in `describe()` output.
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "<null>",
        Value::Bool(_) => "<bool>",
        Value::Number(_) => "<number>",
        Value::String(_) => "<string>",
        Value::Array(_) => "<array>",
        Value::Object(_) => "<object>",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_label_skips_nulls_and_sorts() {
        let mut params = BTreeMap::new();
        params.insert("version".to_string(), Value::Null);
        params.insert("filepath".to_string(), json!("data/a.json"));
        params.insert("pretty".to_string(), json!(true));

        assert_eq!(
            format_label("JSONLocalDataSet", &params),
            "JSONLocalDataSet(filepath=data/a.json, pretty=true)"
        );
    }

    #[test]
    fn test_value_kind() {
        assert_eq!(value_kind(&json!([1, 2])), "<array>");
        assert_eq!(value_kind(&json!({"a": 1})), "<object>");
    }
}
