//! Test utilities for the purger.
//!
//! This module is only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testing::{FileRow, in_memory_metadata_store};
//!
//! let store = in_memory_metadata_store().await?;
//! store.insert_file(&FileRow::new("caches", "eth-mainnet", "states", created_at)).await?;
//! ```

use chrono::{DateTime, Utc};

use crate::config::DatabaseConfig;
use crate::metadata::MetadataStore;

/// One row of the files table.
#[derive(Clone, Debug)]
pub struct FileRow {
    pub bucket: String,
    pub network: String,
    pub subfolder: String,
    pub filename: String,
    pub filetype: i32,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FileRow {
    /// A live output file created at `created_at`.
    pub fn new(bucket: &str, network: &str, subfolder: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            bucket: bucket.to_string(),
            network: network.to_string(),
            subfolder: subfolder.to_string(),
            filename: "0000000000-0000001000.output.zst".to_string(),
            filetype: 0,
            created_at,
            deleted_at: None,
        }
    }

    pub fn with_filename(mut self, filename: &str) -> Self {
        self.filename = filename.to_string();
        self
    }

    pub fn with_filetype(mut self, filetype: i32) -> Self {
        self.filetype = filetype;
        self
    }

    pub fn with_deleted_at(mut self, deleted_at: DateTime<Utc>) -> Self {
        self.deleted_at = Some(deleted_at);
        self
    }
}

/// Connect to a fresh in-memory SQLite database holding an empty files table.
pub async fn in_memory_metadata_store() -> Result<MetadataStore, sqlx::Error> {
    let store = MetadataStore::connect(&DatabaseConfig::in_memory()).await?;
    store.create_files_table().await?;
    Ok(store)
}
