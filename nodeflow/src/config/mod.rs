//! Layered configuration files.
//!
//! A [`ConfigLoader`] scans one or more configuration directories for TOML
//! and JSON files matching glob patterns and merges their top-level keys.
//! Later directories override earlier ones, which is how an environment
//! such as `conf/local` overlays `conf/base`.

mod loader;

pub use loader::{glob_to_regex, ConfigLoader, SUPPORTED_EXTENSIONS};
