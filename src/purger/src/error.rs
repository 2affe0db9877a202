use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Errors that stop a purge run.
///
/// Per-object problems (unclassifiable keys, deletes failing twice) are not
/// errors at this level: they are counted and the run goes on.
#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("invalid purge configuration: {0}")]
    Config(String),

    #[error("resolving module caches to purge: {0}")]
    Resolution(#[from] sqlx::Error),

    #[error("opening storage for bucket {bucket}: {source}")]
    Storage {
        bucket: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("listing files for prefix {prefix:?}: {source}")]
    Listing {
        prefix: String,
        #[source]
        source: object_store::Error,
    },

    #[error("listing files for prefix {prefix:?} did not complete within {timeout:?}")]
    ListingTimeout { prefix: String, timeout: Duration },

    #[error(
        "file {key:?} ({created_at}) is newer than module {target} ({boundary}), refusing to purge"
    )]
    ConsistencyViolation {
        key: String,
        created_at: DateTime<Utc>,
        target: String,
        boundary: DateTime<Utc>,
    },

    #[error("asking for confirmation: {0}")]
    Confirmation(String),

    #[error("purge aborted by operator at module {0}")]
    Aborted(String),
}

impl PurgeError {
    /// Whether this error means metadata and storage disagree.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, PurgeError::ConsistencyViolation { .. })
    }
}
