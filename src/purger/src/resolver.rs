//! Candidate resolution
//!
//! Turns a retention rule into the list of module caches (purge targets) to
//! process, using the file index of the metadata database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::metadata::{MetadataStore, ModuleCache, StaleModuleQuery};
use std::fmt;
use std::time::Duration;
use tracing::info;

use crate::error::PurgeError;

/// One module cache to purge.
///
/// `retention_boundary` is the creation date of the youngest file the
/// metadata knows for this cache. Storage must not hold anything younger,
/// except files still being written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PurgeTarget {
    pub bucket: String,
    pub scope: String,
    pub sub_path: String,
    pub retention_boundary: DateTime<Utc>,
}

impl PurgeTarget {
    /// Storage prefix holding the files of this module cache
    pub fn prefix(&self) -> String {
        format!("{}/{}", self.scope, self.sub_path)
    }
}

impl fmt::Display for PurgeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) {}, {}",
            self.bucket, self.scope, self.sub_path, self.retention_boundary
        )
    }
}

impl From<ModuleCache> for PurgeTarget {
    fn from(cache: ModuleCache) -> Self {
        Self {
            bucket: cache.bucket,
            scope: cache.network,
            sub_path: cache.subfolder,
            retention_boundary: cache.youngest_file_creation_date,
        }
    }
}

/// Which module caches a run looks at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PurgeCriteria {
    /// Every module cache of a scope (network) idle for longer than `max_age`
    Age { scope: String, max_age: Duration },
    /// The module cache(s) stored under a literal sub path, with the same
    /// staleness rule; `oldest_only` keeps only the most overdue one
    Subfolder {
        sub_path: String,
        scope: Option<String>,
        max_age: Duration,
        oldest_only: bool,
    },
}

impl PurgeCriteria {
    fn max_age(&self) -> Duration {
        match self {
            PurgeCriteria::Age { max_age, .. } | PurgeCriteria::Subfolder { max_age, .. } => {
                *max_age
            }
        }
    }

    fn validate(&self) -> Result<(), PurgeError> {
        match self {
            PurgeCriteria::Age { scope, .. } => require_non_empty("scope", scope),
            PurgeCriteria::Subfolder {
                sub_path, scope, ..
            } => {
                require_non_empty("sub path", sub_path)?;
                match scope {
                    Some(scope) => require_non_empty("scope", scope),
                    None => Ok(()),
                }
            }
        }
    }
}

fn require_non_empty(name: &str, value: &str) -> Result<(), PurgeError> {
    if value.trim().is_empty() {
        return Err(PurgeError::Config(format!("{name} must not be empty")));
    }
    if value.starts_with('/') || value.ends_with('/') {
        return Err(PurgeError::Config(format!(
            "{name} {value:?} must not start or end with '/'"
        )));
    }
    Ok(())
}

/// Where module cache metadata comes from.
#[async_trait]
pub trait TargetSource: Send + Sync {
    async fn stale_module_caches(
        &self,
        query: &StaleModuleQuery<'_>,
    ) -> Result<Vec<ModuleCache>, sqlx::Error>;
}

#[async_trait]
impl TargetSource for MetadataStore {
    async fn stale_module_caches(
        &self,
        query: &StaleModuleQuery<'_>,
    ) -> Result<Vec<ModuleCache>, sqlx::Error> {
        MetadataStore::stale_module_caches(self, query).await
    }
}

/// Resolves purge criteria to purge targets.
pub struct CandidateResolver<S> {
    source: S,
}

impl<S: TargetSource> CandidateResolver<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Resolve the targets matching `criteria`, oldest retention boundary first.
    ///
    /// All or nothing: any query failure fails the resolution.
    pub async fn resolve(&self, criteria: &PurgeCriteria) -> Result<Vec<PurgeTarget>, PurgeError> {
        criteria.validate()?;

        let max_age = chrono::Duration::from_std(criteria.max_age())
            .map_err(|e| PurgeError::Config(format!("max age out of range: {e}")))?;
        let cutoff = Utc::now() - max_age;

        let query = match criteria {
            PurgeCriteria::Age { scope, .. } => StaleModuleQuery {
                network: Some(scope.as_str()),
                subfolder: None,
                cutoff,
                limit: None,
            },
            PurgeCriteria::Subfolder {
                sub_path,
                scope,
                oldest_only,
                ..
            } => StaleModuleQuery {
                network: scope.as_deref(),
                subfolder: Some(sub_path.as_str()),
                cutoff,
                limit: oldest_only.then_some(1),
            },
        };

        info!(
            network = ?query.network,
            subfolder = ?query.subfolder,
            cutoff = %cutoff,
            "Querying module caches to purge"
        );

        let mut targets: Vec<PurgeTarget> = self
            .source
            .stale_module_caches(&query)
            .await?
            .into_iter()
            .map(PurgeTarget::from)
            .collect();
        targets.sort_by_key(|target| target.retention_boundary);

        info!(modules_count = targets.len(), "Resolved module caches to purge");
        Ok(targets)
    }
}
