use anyhow::{Context, Result};
use object_store::{
    BackoffConfig, ObjectStore, RetryConfig, aws::AmazonS3Builder,
    gcp::GoogleCloudStorageBuilder, local::LocalFileSystem, memory::InMemory,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use url::Url;

use crate::config::{StorageConfig, StorageRetryConfig};

/// Object stores per bucket, built lazily from the configured URL template.
///
/// Purge targets name their bucket; every target of the same bucket shares one
/// client. Stores can also be registered up front, which is how tests inject
/// pre-populated in-memory buckets.
pub struct BucketStores {
    config: StorageConfig,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl BucketStores {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Use `store` for every target in `bucket`.
    pub fn register(&self, bucket: &str, store: Arc<dyn ObjectStore>) {
        self.stores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(bucket.to_string(), store);
    }

    /// Get (or create) the object store of a bucket
    pub fn store_for(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        let mut stores = self
            .stores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(store) = stores.get(bucket) {
            return Ok(store.clone());
        }

        validate_bucket_name(bucket)?;
        let url = self.config.bucket_url(bucket);
        log::debug!("Creating object store for bucket {bucket} at {url}");
        let store = create_object_store_from_dsn(&url, &self.config.retry)
            .with_context(|| format!("Failed to create object store for bucket {bucket}"))?;
        stores.insert(bucket.to_string(), store.clone());
        Ok(store)
    }
}

/// Bucket names come from the metadata database and end up in URLs and paths.
fn validate_bucket_name(bucket: &str) -> Result<()> {
    let valid_chars = bucket
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if bucket.is_empty() || !valid_chars || bucket.contains("..") {
        anyhow::bail!("Invalid bucket name: {bucket:?}");
    }
    Ok(())
}

/// Translate the configured retry policy to the object store client's.
pub fn retry_config(config: &StorageRetryConfig) -> RetryConfig {
    RetryConfig {
        backoff: BackoffConfig {
            init_backoff: config.init_backoff,
            max_backoff: config.max_backoff,
            base: 2.0,
        },
        max_retries: config.max_retries,
        retry_timeout: config.retry_timeout,
    }
}

/// Create an object store from a DSN string
///
/// Supported schemes:
/// - `gs://bucket` (credentials from the environment)
/// - `s3://bucket` (AWS, credentials from the environment) or
///   `s3://[access_key:secret_key@]host[:port]/bucket` (S3-compatible)
/// - `file:///path/to/bucket`
/// - `memory://`
pub fn create_object_store_from_dsn(
    dsn: &str,
    retry: &StorageRetryConfig,
) -> Result<Arc<dyn ObjectStore>> {
    let url =
        Url::parse(dsn).map_err(|e| anyhow::anyhow!("Invalid storage DSN '{}': {}", dsn, e))?;

    match url.scheme() {
        "file" => {
            let path = url.path();
            if path.is_empty() || path == "/" {
                return Err(anyhow::anyhow!(
                    "File DSN must specify a path: file:///path/to/storage"
                ));
            }
            Ok(Arc::new(LocalFileSystem::new_with_prefix(path)?))
        }
        "memory" => Ok(Arc::new(InMemory::new())),
        "gs" => {
            let store = GoogleCloudStorageBuilder::from_env()
                .with_url(dsn)
                .with_retry(retry_config(retry))
                .build()?;
            Ok(Arc::new(store))
        }
        "s3" => {
            let builder = create_s3_builder_from_dsn(&url)?.with_retry(retry_config(retry));
            Ok(Arc::new(builder.build()?))
        }
        scheme => Err(anyhow::anyhow!(
            "Unsupported storage scheme: {}. Supported: gs, s3, file, memory",
            scheme
        )),
    }
}

/// Create an S3 builder from a DSN
pub fn create_s3_builder_from_dsn(dsn: &Url) -> Result<AmazonS3Builder> {
    let host = dsn
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("Missing S3 host in DSN"))?;
    let bucket = dsn.path().trim_start_matches('/');

    // s3://bucket: plain AWS, everything else from the environment
    if bucket.is_empty() {
        return Ok(AmazonS3Builder::from_env().with_bucket_name(host));
    }

    let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);

    let access_key = dsn.username();
    let secret_key = dsn.password().unwrap_or("");
    if !access_key.is_empty() {
        builder = builder
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key);
    }

    let port = dsn.port();
    let scheme = if port == Some(443) { "https" } else { "http" };
    let endpoint = match port {
        Some(p) => format!("{scheme}://{host}:{p}"),
        None => format!("{scheme}://{host}"),
    };

    Ok(builder
        .with_endpoint(endpoint)
        .with_allow_http(scheme == "http")
        .with_virtual_hosted_style_request(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::path::Path;

    #[test]
    fn test_retry_config_conversion() {
        let retry = retry_config(&StorageRetryConfig::default());
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.backoff.init_backoff.as_millis(), 100);
        assert_eq!(retry.backoff.max_backoff.as_secs(), 15);
        assert_eq!(retry.retry_timeout.as_secs(), 180);
    }

    #[test]
    fn test_unsupported_scheme() {
        let result = create_object_store_from_dsn("ftp://host/bucket", &Default::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_file_dsn_requires_path() {
        let result = create_object_store_from_dsn("file:///", &Default::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_s3_compatible_dsn() {
        let url = Url::parse("s3://minio:secret@localhost:9000/caches").unwrap();
        assert!(create_s3_builder_from_dsn(&url).is_ok());
    }

    #[test]
    fn test_invalid_bucket_names_are_rejected() {
        let stores = BucketStores::new(StorageConfig::in_memory());
        assert!(stores.store_for("").is_err());
        assert!(stores.store_for("../etc").is_err());
        assert!(stores.store_for("bucket/other").is_err());
        assert!(stores.store_for("dfuse-caches_1.eu").is_ok());
    }

    #[tokio::test]
    async fn test_memory_buckets_are_cached_per_bucket() {
        let stores = BucketStores::new(StorageConfig::in_memory());

        let first = stores.store_for("bucket-a").unwrap();
        first
            .put(&Path::from("net/a.txt"), bytes_payload().into())
            .await
            .unwrap();

        // same bucket, same store
        let again = stores.store_for("bucket-a").unwrap();
        assert!(again.head(&Path::from("net/a.txt")).await.is_ok());

        // different bucket, different store
        let other = stores.store_for("bucket-b").unwrap();
        assert!(other.head(&Path::from("net/a.txt")).await.is_err());
    }

    #[tokio::test]
    async fn test_file_bucket_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("caches")).unwrap();

        let config = StorageConfig {
            url_template: format!("file://{}/{{bucket}}", dir.path().display()),
            ..Default::default()
        };
        let stores = BucketStores::new(config);
        let store = stores.store_for("caches").unwrap();
        store
            .put(&Path::from("eth/x.bin"), bytes_payload().into())
            .await
            .unwrap();
        assert!(dir.path().join("caches/eth/x.bin").exists());
    }

    fn bytes_payload() -> Vec<u8> {
        vec![1, 2, 3]
    }
}
