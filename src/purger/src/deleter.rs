use anyhow::{Context, Result};
use async_trait::async_trait;
use object_store::ObjectStore;
use object_store::path::Path as ObjectPath;
use std::sync::Arc;

/// Deletes one object by key.
///
/// Keys are object locations as listed, with special characters already
/// percent-encoded. Deleting a key that no longer exists must succeed, the
/// pool may retry a delete that already went through.
#[async_trait]
pub trait Deleter: Send + Sync {
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Deletes from an object store bucket.
#[derive(Clone, Debug)]
pub struct ObjectStoreDeleter {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreDeleter {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Deleter for ObjectStoreDeleter {
    async fn delete(&self, key: &str) -> Result<()> {
        let path = ObjectPath::parse(key).with_context(|| format!("Invalid object key: {key}"))?;
        match self.store.delete(&path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => {
                tracing::trace!(key = %key, "Object already gone");
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to delete file: {key}")),
        }
    }
}
