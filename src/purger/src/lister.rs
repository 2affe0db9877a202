//! Object listing
//!
//! Walks the objects stored under a module cache prefix.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore};
use std::ops::ControlFlow;
use std::time::Duration;

use crate::error::PurgeError;

/// One listed object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectRecord {
    pub key: String,
    /// Last modification time, artifacts are written once
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

impl From<ObjectMeta> for ObjectRecord {
    fn from(meta: ObjectMeta) -> Self {
        Self {
            key: meta.location.to_string(),
            created_at: meta.last_modified,
            size_bytes: meta.size,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListOptions {
    /// Stop after this many objects, `None` lists everything
    pub limit: Option<usize>,
    /// Ceiling for the whole listing pass
    pub timeout: Duration,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: None,
            timeout: Duration::from_secs(6 * 3600),
        }
    }
}

/// List the objects under `prefix`, handing each one to `on_each`.
///
/// Listing stops as soon as `on_each` breaks. Returns the number of objects
/// seen, including the one that broke. Exceeding `options.timeout` fails the
/// pass instead of returning a partial listing.
pub async fn list_objects<F>(
    store: &dyn ObjectStore,
    prefix: &str,
    options: &ListOptions,
    on_each: F,
) -> Result<usize, PurgeError>
where
    F: FnMut(ObjectRecord) -> ControlFlow<()>,
{
    let path = ObjectPath::from(prefix);
    tracing::debug!(prefix = %prefix, limit = ?options.limit, "Listing objects");

    let stream = store.list(Some(&path));
    let seen = consume_listing(stream, prefix, options, on_each).await?;

    tracing::debug!(prefix = %prefix, objects = seen, "Listing complete");
    Ok(seen)
}

async fn consume_listing<F>(
    mut stream: BoxStream<'_, object_store::Result<ObjectMeta>>,
    prefix: &str,
    options: &ListOptions,
    mut on_each: F,
) -> Result<usize, PurgeError>
where
    F: FnMut(ObjectRecord) -> ControlFlow<()>,
{
    let walk = async {
        let mut seen = 0usize;
        while options.limit.is_none_or(|limit| seen < limit) {
            let Some(meta) = stream.next().await else {
                break;
            };
            let meta = meta.map_err(|source| PurgeError::Listing {
                prefix: prefix.to_string(),
                source,
            })?;
            seen += 1;
            if on_each(ObjectRecord::from(meta)).is_break() {
                break;
            }
        }
        Ok(seen)
    };

    match tokio::time::timeout(options.timeout, walk).await {
        Ok(result) => result,
        Err(_) => Err(PurgeError::ListingTimeout {
            prefix: prefix.to_string(),
            timeout: options.timeout,
        }),
    }
}
