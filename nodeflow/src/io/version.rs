//! Timestamped versions for file-backed data sets.
//!
//! A versioned data set declared with `filepath = "data/model.json"` stores
//! each save under `data/model.json/<version>/model.json`. Version ids are
//! UTC timestamps with millisecond precision, so sorting ids as strings sorts
//! them chronologically.

use crate::errors::DataSetError;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// `chrono` format of version ids, e.g. `2019-06-01T12.30.45.123Z`.
pub const VERSION_FORMAT: &str = "%Y-%m-%dT%H.%M.%S%.3fZ";

/// Returns a version id for the current instant.
#[must_use]
pub fn generate_timestamp() -> String {
    Utc::now().format(VERSION_FORMAT).to_string()
}

/// Parses a version id produced by [`generate_timestamp`].
#[must_use]
pub fn parse_timestamp(id: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(id, VERSION_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Returns a version id strictly later than `latest`.
///
/// Two saves within the same millisecond would otherwise collide.
fn next_version_after(latest: Option<&Version>) -> String {
    let now = Utc::now();
    let candidate = match latest.and_then(Version::timestamp) {
        Some(previous) if now <= previous => previous + Duration::milliseconds(1),
        _ => now,
    };
    candidate.format(VERSION_FORMAT).to_string()
}

/// One stored version of a data set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    /// The version id (a timestamp for generated versions).
    pub id: String,
    /// The file holding this version.
    pub path: PathBuf,
}

impl Version {
    /// Returns the timestamp encoded in the id, if it is one.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.id)
    }
}

/// Pins the version a data set loads and/or saves.
///
/// `None` means "latest" for loads and "generate a new one" for saves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSelector {
    /// Version to load.
    pub load: Option<String>,
    /// Version to save.
    pub save: Option<String>,
}

impl VersionSelector {
    /// Load the latest version and generate save versions.
    #[must_use]
    pub fn latest() -> Self {
        Self::default()
    }

    /// Pins the load version.
    #[must_use]
    pub fn with_load(mut self, version: impl Into<String>) -> Self {
        self.load = Some(version.into());
        self
    }

    /// Pins the save version.
    #[must_use]
    pub fn with_save(mut self, version: impl Into<String>) -> Self {
        self.save = Some(version.into());
        self
    }
}

/// Resolves load and save paths for a possibly versioned file.
#[derive(Debug, Clone)]
pub struct VersionedPath {
    filepath: PathBuf,
    selector: Option<VersionSelector>,
}

impl VersionedPath {
    /// A plain, unversioned file.
    #[must_use]
    pub fn unversioned(filepath: impl Into<PathBuf>) -> Self {
        Self {
            filepath: filepath.into(),
            selector: None,
        }
    }

    /// A versioned file.
    #[must_use]
    pub fn versioned(filepath: impl Into<PathBuf>, selector: VersionSelector) -> Self {
        Self {
            filepath: filepath.into(),
            selector: Some(selector),
        }
    }

    /// The declared file path.
    #[must_use]
    pub fn filepath(&self) -> &Path {
        &self.filepath
    }

    /// Whether versioning is enabled.
    #[must_use]
    pub fn is_versioned(&self) -> bool {
        self.selector.is_some()
    }

    /// The pinned versions, if versioned.
    #[must_use]
    pub fn selector(&self) -> Option<&VersionSelector> {
        self.selector.as_ref()
    }

    fn version_path(&self, id: &str) -> PathBuf {
        let file_name = self.filepath.file_name().unwrap_or(self.filepath.as_os_str());
        self.filepath.join(id).join(file_name)
    }

    /// Lists versions present on disk, oldest first.
    pub fn versions(&self) -> Result<Vec<Version>, DataSetError> {
        if !self.is_versioned() || !self.filepath.is_dir() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.filepath)
            .map_err(|e| DataSetError::load(self.filepath.display().to_string(), e))?;

        let mut versions = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| DataSetError::load(self.filepath.display().to_string(), e))?;
            let Some(id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let path = self.version_path(&id);
            if path.is_file() {
                versions.push(Version { id, path });
            }
        }
        versions.sort();
        Ok(versions)
    }

    /// Returns the version a load would read; `None` when unversioned.
    pub fn resolve_load_version(&self) -> Result<Option<Version>, DataSetError> {
        let Some(selector) = &self.selector else {
            return Ok(None);
        };
        if let Some(id) = &selector.load {
            return Ok(Some(Version {
                id: id.clone(),
                path: self.version_path(id),
            }));
        }
        match self.versions()?.pop() {
            Some(latest) => Ok(Some(latest)),
            None => Err(DataSetError::Versioning {
                data_set: self.filepath.display().to_string(),
                message: format!(
                    "Did not find any versions for {}",
                    self.filepath.display()
                ),
            }),
        }
    }

    /// Returns the path a load reads from.
    pub fn load_path(&self) -> Result<PathBuf, DataSetError> {
        Ok(self
            .resolve_load_version()?
            .map_or_else(|| self.filepath.clone(), |v| v.path))
    }

    /// Returns the path a save writes to.
    ///
    /// Versioned saves never overwrite: the target must not exist yet.
    pub fn save_path(&self) -> Result<PathBuf, DataSetError> {
        let Some(selector) = &self.selector else {
            return Ok(self.filepath.clone());
        };
        let id = match &selector.save {
            Some(id) => id.clone(),
            None => next_version_after(self.versions()?.last()),
        };
        let path = self.version_path(&id);
        if path.exists() {
            return Err(DataSetError::Versioning {
                data_set: self.filepath.display().to_string(),
                message: format!(
                    "Save path `{}` for {} must not exist if versioning is enabled.",
                    path.display(),
                    self.filepath.display()
                ),
            });
        }
        Ok(path)
    }

    /// Warns when a freshly saved version is not the one loads resolve to.
    pub fn check_consistency(&self, saved: &Path) {
        if !self.is_versioned() {
            return;
        }
        match self.load_path() {
            Ok(load_path) if load_path != saved => warn!(
                "Save path `{}` did not match load path `{}` for {}. \
                 Subsequent loads will not read the data just saved.",
                saved.display(),
                load_path.display(),
                self.filepath.display()
            ),
            _ => {}
        }
    }
}
