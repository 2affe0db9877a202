pub mod cli;
pub mod config;
pub mod metadata;
pub mod storage;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use metadata::{MetadataStore, ModuleCache, StaleModuleQuery};
pub use storage::BucketStores;
