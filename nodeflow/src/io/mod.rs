//! Data sets and the catalog that names them.
//!
//! Every load and save a runner performs goes through a [`DataCatalog`],
//! which maps logical names onto [`DataSet`] backends:
//!
//! - [`MemoryDataSet`] for intermediate values
//! - [`SharedMemoryDataSet`] for values shared with parallel workers
//! - [`LambdaDataSet`] for user closures
//! - [`JsonLocalDataSet`] and [`TextLocalDataSet`] for local files, optionally
//!   versioned

mod catalog;
mod core;
mod lambda;
mod local;
mod memory;
mod registry;
mod shared_memory;
mod version;

pub use catalog::{memory_factory, CatalogOptions, DataCatalog, DefaultDataSetFactory};
pub use self::core::{DataSet, Versioned};
pub(crate) use self::core::value_kind;
pub use lambda::LambdaDataSet;
pub use local::{
    FileCodec, JsonCodec, JsonLocalDataSet, LocalFileDataSet, TextCodec, TextLocalDataSet,
};
pub use memory::MemoryDataSet;
pub use registry::{DataSetConfig, DataSetFactory, DataSetRegistry};
pub use shared_memory::{SharedMemoryDataSet, SharedMemoryStore, StoreClosed};
pub use version::{
    generate_timestamp, parse_timestamp, Version, VersionSelector, VersionedPath, VERSION_FORMAT,
};
