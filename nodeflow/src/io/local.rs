//! File-backed data sets on the local filesystem.
//!
//! [`LocalFileDataSet`] owns path handling and versioning; a [`FileCodec`]
//! only converts between file contents and values.

use super::core::{value_kind, DataSet, Versioned};
use super::version::{VersionSelector, VersionedPath};
use crate::errors::DataSetError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Converts between file contents and values.
pub trait FileCodec: Send + Sync + Debug + 'static {
    /// Type identifier of data sets using this codec.
    const TYPE_NAME: &'static str;

    /// Parses file contents.
    fn decode(&self, raw: &str) -> anyhow::Result<Value>;

    /// Renders a value as file contents.
    fn encode(&self, value: &Value) -> anyhow::Result<String>;

    /// Adds codec options to the data set description.
    fn describe(&self, _desc: &mut BTreeMap<String, Value>) {}
}

/// JSON documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    /// Write indented output.
    pub pretty: bool,
}

impl FileCodec for JsonCodec {
    const TYPE_NAME: &'static str = "JSONLocalDataSet";

    fn decode(&self, raw: &str) -> anyhow::Result<Value> {
        Ok(serde_json::from_str(raw)?)
    }

    fn encode(&self, value: &Value) -> anyhow::Result<String> {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        Ok(rendered)
    }

    fn describe(&self, desc: &mut BTreeMap<String, Value>) {
        if self.pretty {
            desc.insert("pretty".to_string(), Value::Bool(true));
        }
    }
}

/// Plain UTF-8 text. Only string values can be saved.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl FileCodec for TextCodec {
    const TYPE_NAME: &'static str = "TextLocalDataSet";

    fn decode(&self, raw: &str) -> anyhow::Result<Value> {
        Ok(Value::String(raw.to_string()))
    }

    fn encode(&self, value: &Value) -> anyhow::Result<String> {
        match value {
            Value::String(text) => Ok(text.clone()),
            other => anyhow::bail!(
                "{} can only save string values, got {}",
                Self::TYPE_NAME,
                value_kind(other)
            ),
        }
    }
}

/// A single file, optionally versioned, read and written through a codec.
#[derive(Debug, Clone)]
pub struct LocalFileDataSet<C: FileCodec> {
    path: VersionedPath,
    codec: C,
}

/// JSON file on local disk.
pub type JsonLocalDataSet = LocalFileDataSet<JsonCodec>;

/// Text file on local disk.
pub type TextLocalDataSet = LocalFileDataSet<TextCodec>;

impl<C: FileCodec> LocalFileDataSet<C> {
    /// Creates an unversioned data set.
    pub fn new(filepath: impl Into<PathBuf>, codec: C) -> Self {
        Self {
            path: VersionedPath::unversioned(filepath),
            codec,
        }
    }

    /// Creates a versioned data set.
    pub fn versioned(filepath: impl Into<PathBuf>, selector: VersionSelector, codec: C) -> Self {
        Self {
            path: VersionedPath::versioned(filepath, selector),
            codec,
        }
    }

    /// Creates a data set from an already built path resolver.
    pub fn with_path(path: VersionedPath, codec: C) -> Self {
        Self { path, codec }
    }

    /// The declared file path.
    #[must_use]
    pub fn filepath(&self) -> &Path {
        self.path.filepath()
    }
}

impl<C: FileCodec + Default> LocalFileDataSet<C> {
    /// Creates an unversioned data set with default codec options.
    pub fn at(filepath: impl Into<PathBuf>) -> Self {
        Self::new(filepath, C::default())
    }
}

impl<C: FileCodec> DataSet for LocalFileDataSet<C> {
    fn type_name(&self) -> &'static str {
        C::TYPE_NAME
    }

    fn describe(&self) -> BTreeMap<String, Value> {
        let mut desc = BTreeMap::new();
        desc.insert(
            "filepath".to_string(),
            Value::String(self.path.filepath().display().to_string()),
        );
        let version = self.path.selector().map(|selector| {
            serde_json::json!({ "load": selector.load, "save": selector.save })
        });
        desc.insert("version".to_string(), version.unwrap_or(Value::Null));
        self.codec.describe(&mut desc);
        desc
    }

    fn load(&self) -> Result<Value, DataSetError> {
        let path = self.path.load_path()?;
        debug!(path = %path.display(), "Reading {}", C::TYPE_NAME);
        let raw = std::fs::read_to_string(&path).map_err(|e| DataSetError::load(self.label(), e))?;
        self.codec
            .decode(&raw)
            .map_err(|e| DataSetError::load(self.label(), e))
    }

    fn save(&self, data: Value) -> Result<(), DataSetError> {
        let path = self.path.save_path()?;
        let rendered = self
            .codec
            .encode(&data)
            .map_err(|e| DataSetError::save(self.label(), e))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DataSetError::save(self.label(), e))?;
        }
        std::fs::write(&path, rendered).map_err(|e| DataSetError::save(self.label(), e))?;
        debug!(path = %path.display(), "Wrote {}", C::TYPE_NAME);
        self.path.check_consistency(&path);
        Ok(())
    }

    fn exists(&self) -> Result<bool, DataSetError> {
        match self.path.load_path() {
            Ok(path) => Ok(path.is_file()),
            // A versioned data set with no versions yet simply does not exist.
            Err(DataSetError::Versioning { .. }) => Ok(false),
            Err(e) => Err(DataSetError::exists(self.label(), e)),
        }
    }

    fn as_versioned(&self) -> Option<&dyn Versioned> {
        self.path.is_versioned().then_some(self as &dyn Versioned)
    }
}

impl<C: FileCodec> Versioned for LocalFileDataSet<C> {
    fn versioned_path(&self) -> &VersionedPath {
        &self.path
    }
}
