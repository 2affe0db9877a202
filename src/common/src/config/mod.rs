use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "purger.toml";

/// Environment variable prefix, nested keys are split on `__`.
pub const ENV_PREFIX: &str = "PURGER__";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// DSN of the metadata database (PostgreSQL or SQLite)
    pub dsn: String,
    /// Table holding one row per stored module cache file
    pub files_table: String,
    /// `filetype` value of marker/manifest rows, never a purge target
    pub excluded_filetype: i32,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("postgres://localhost:5432/postgres?sslmode=disable"),
            files_table: String::from("cost_estimator.files"),
            excluded_filetype: 1,
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    /// Create an in-memory database configuration for local runs and tests
    pub fn in_memory() -> Self {
        Self {
            dsn: String::from("sqlite::memory:"),
            files_table: String::from("files"),
            ..Default::default()
        }
    }
}

/// Request-level retry policy handed to the object store client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageRetryConfig {
    pub max_retries: usize,
    #[serde(with = "humantime_serde")]
    pub init_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Give up retrying a single request after this long
    #[serde(with = "humantime_serde")]
    pub retry_timeout: Duration,
}

impl Default for StorageRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(15),
            retry_timeout: Duration::from_secs(3 * 60),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// URL of a bucket, `{bucket}` is replaced by the bucket name of each
    /// purge target (e.g. `gs://{bucket}`, `file:///data/{bucket}`).
    pub url_template: String,
    #[serde(default)]
    pub retry: StorageRetryConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url_template: String::from("gs://{bucket}"),
            retry: StorageRetryConfig::default(),
        }
    }
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        Self {
            url_template: String::from("memory://{bucket}"),
            ..Default::default()
        }
    }

    /// Storage URL for one bucket.
    pub fn bucket_url(&self, bucket: &str) -> String {
        self.url_template.replace("{bucket}", bucket)
    }
}

/// What to do when the operator answers "no" for a target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclinePolicy {
    #[default]
    SkipTarget,
    AbortRun,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PurgeConfig {
    /// Number of concurrent delete workers per target
    pub workers: usize,
    /// Capacity of the bounded delete job queue
    pub queue_capacity: usize,
    /// Ceiling for a single delete attempt
    #[serde(with = "humantime_serde")]
    pub delete_timeout: Duration,
    /// Pause before the single retry of a failed delete
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
    /// Ceiling for one listing pass over a target prefix
    #[serde(with = "humantime_serde")]
    pub listing_timeout: Duration,
    /// Maximum number of objects listed per target, unbounded when unset
    #[serde(default)]
    pub listing_limit: Option<usize>,
    /// Log progress every N processed delete jobs
    pub progress_interval: usize,
    /// Module caches whose youngest file is older than this are purged
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
    /// Key suffix of artifacts that are still being written
    pub partial_suffix: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub decline_policy: DeclinePolicy,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            workers: 250,
            queue_capacity: 1000,
            delete_timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_millis(250),
            listing_timeout: Duration::from_secs(6 * 3600),
            listing_limit: None,
            progress_interval: 1000,
            max_age: Duration::from_secs(30 * 24 * 3600),
            partial_suffix: String::from(".partial.zst"),
            dry_run: false,
            decline_policy: DeclinePolicy::SkipTarget,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Metadata database holding the module cache file index
    pub database: DatabaseConfig,
    /// Bucket storage the module caches live in
    pub storage: StorageConfig,
    /// Purge engine tuning
    pub purge: PurgeConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Path::new(DEFAULT_CONFIG_FILE))
            .extract()
            .map_err(Box::new)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(path).extract().map_err(Box::new)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}
