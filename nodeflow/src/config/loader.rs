use crate::errors::{ConfigError, MissingConfigError};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File extensions the loader reads.
pub const SUPPORTED_EXTENSIONS: [&str; 2] = ["toml", "json"];

const MAX_DUPLICATE_LISTING: usize = 100;

/// Loads and merges configuration files from a list of directories.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    conf_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Creates a loader over `conf_paths`, lowest precedence first.
    pub fn new<I, P>(conf_paths: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let conf_paths: Vec<PathBuf> = conf_paths.into_iter().map(Into::into).collect();
        if conf_paths.is_empty() {
            return Err(ConfigError::NoPaths);
        }
        Ok(Self { conf_paths })
    }

    /// Configuration directories in precedence order.
    pub fn conf_paths(&self) -> &[PathBuf] {
        &self.conf_paths
    }

    /// Merges every file matching any of `patterns`.
    ///
    /// Keys starting with `_` are dropped. Two files of the same directory
    /// may not define the same top-level key.
    pub fn get<S: AsRef<str>>(&self, patterns: &[S]) -> Result<Map<String, Value>, ConfigError> {
        if patterns.is_empty() {
            return Err(ConfigError::NoPatterns);
        }
        let matchers = patterns
            .iter()
            .map(|p| glob_to_regex(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut config = Map::new();
        let mut processed = 0;
        for conf_path in &self.conf_paths {
            let (layer, files) = load_layer(conf_path, &matchers)?;
            let overridden: Vec<&str> = layer
                .keys()
                .filter(|k| config.contains_key(*k))
                .map(String::as_str)
                .collect();
            if !overridden.is_empty() {
                debug!(
                    "Config from path `{}` will override the following existing top-level config keys: {}",
                    conf_path.display(),
                    overridden.join(", ")
                );
            }
            config.extend(layer);
            processed += files;
        }

        if processed == 0 {
            return Err(MissingConfigError {
                paths: self
                    .conf_paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect(),
                patterns: patterns.iter().map(|p| p.as_ref().to_string()).collect(),
            }
            .into());
        }
        Ok(config)
    }
}

/// Compiles a glob into an anchored regex over `/`-separated relative paths.
///
/// `**/` matches zero or more directories, `**` anything, `*` anything
/// within one path segment and `?` a single character.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, ConfigError> {
    let mut expr = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    expr.push_str("(?:.*/)?");
                } else {
                    expr.push_str(".*");
                }
            }
            '*' => expr.push_str("[^/]*"),
            '?' => expr.push_str("[^/]"),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| ConfigError::Pattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

fn load_layer(conf_path: &Path, matchers: &[Regex]) -> Result<(Map<String, Value>, usize), ConfigError> {
    if !conf_path.is_dir() {
        return Err(ConfigError::InvalidPath {
            path: conf_path.to_path_buf(),
        });
    }

    let mut files = BTreeSet::new();
    collect_files(conf_path, conf_path, matchers, &mut files)?;

    let mut config = Map::new();
    let mut seen: Vec<(PathBuf, BTreeSet<String>)> = Vec::new();
    for path in &files {
        let loaded = load_file(path)?;
        let keys: BTreeSet<String> = loaded.keys().cloned().collect();

        let duplicates: Vec<String> = seen
            .iter()
            .filter_map(|(other, other_keys)| {
                let common: Vec<&str> = keys.intersection(other_keys).map(String::as_str).collect();
                (!common.is_empty())
                    .then(|| format!("{}: {}", other.display(), truncate(&common.join(", "))))
            })
            .collect();
        if !duplicates.is_empty() {
            return Err(ConfigError::DuplicateKeys {
                file: path.clone(),
                duplicates,
            });
        }

        seen.push((path.clone(), keys));
        config.extend(loaded);
    }
    Ok((config, files.len()))
}

fn truncate(listing: &str) -> String {
    match listing.char_indices().nth(MAX_DUPLICATE_LISTING) {
        Some((cut, _)) => format!("{}...", &listing[..cut]),
        None => listing.to_string(),
    }
}

fn collect_files(
    root: &Path,
    dir: &Path,
    matchers: &[Regex],
    files: &mut BTreeSet<PathBuf>,
) -> Result<(), ConfigError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if hidden {
            continue;
        }
        if path.is_dir() {
            collect_files(root, &path, matchers, files)?;
            continue;
        }

        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e));
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if supported && matchers.iter().any(|m| m.is_match(&relative)) {
            files.insert(path.canonicalize()?);
        }
    }
    Ok(())
}

fn load_file(path: &Path) -> Result<Map<String, Value>, ConfigError> {
    info!("Loading: {}", path.display());
    let text = fs::read_to_string(path)?;
    let parsed: Value = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?,
        _ => serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?,
    };
    match parsed {
        Value::Object(map) => Ok(map.into_iter().filter(|(k, _)| !k.starts_with('_')).collect()),
        _ => Err(ConfigError::NotAMapping {
            path: path.to_path_buf(),
        }),
    }
}
