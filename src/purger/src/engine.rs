//! Purge orchestration
//!
//! Targets are processed one after the other. For each target every object
//! under its prefix is listed and validated, then classified and filtered,
//! before the first delete is issued. A consistency violation anywhere in a
//! target leaves that target untouched.

use common::BucketStores;
use common::config::PurgeConfig;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::codec::classify;
use crate::confirm::ConfirmationGate;
use crate::deleter::ObjectStoreDeleter;
use crate::error::PurgeError;
use crate::filter::ObjectFilter;
use crate::lister::{ListOptions, ObjectRecord, list_objects};
use crate::metrics::{CountersSummary, RunCounters};
use crate::pool::{DeleteJob, DeletionPool, PoolConfig};
use crate::resolver::{CandidateResolver, PurgeCriteria, PurgeTarget, TargetSource};
use crate::safety::SafetyValidator;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub pool: PoolConfig,
    pub list: ListOptions,
    pub partial_suffix: String,
    /// List and validate, never delete
    pub dry_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&PurgeConfig::default())
    }
}

impl From<&PurgeConfig> for EngineConfig {
    fn from(config: &PurgeConfig) -> Self {
        Self {
            pool: PoolConfig::from(config),
            list: ListOptions {
                limit: config.listing_limit,
                timeout: config.listing_timeout,
            },
            partial_suffix: config.partial_suffix.clone(),
            dry_run: config.dry_run,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetOutcome {
    Purged,
    /// Candidates found, nothing deleted on purpose
    DryRun,
    /// The operator said no
    Declined,
    NothingToPurge,
}

#[derive(Clone, Debug)]
pub struct TargetReport {
    pub target: PurgeTarget,
    pub outcome: TargetOutcome,
    /// Objects selected for deletion
    pub candidates: usize,
    pub candidate_bytes: u64,
    pub counters: CountersSummary,
    pub elapsed: Duration,
}

#[derive(Clone, Debug, Default)]
pub struct PurgeReport {
    pub targets: Vec<TargetReport>,
    pub totals: CountersSummary,
    pub dry_run: bool,
}

impl PurgeReport {
    /// Targets whose candidates went through the deletion pool
    pub fn purged_targets(&self) -> usize {
        self.targets
            .iter()
            .filter(|report| report.outcome == TargetOutcome::Purged)
            .count()
    }

    /// Files and bytes a dry run would have deleted
    pub fn candidate_totals(&self) -> (usize, u64) {
        self.targets.iter().fold((0, 0), |(files, bytes), report| {
            (files + report.candidates, bytes + report.candidate_bytes)
        })
    }
}

/// Runs purges against one metadata source and a set of buckets.
pub struct Purger<S> {
    resolver: CandidateResolver<S>,
    stores: Arc<BucketStores>,
    gate: ConfirmationGate,
    filter: ObjectFilter,
    validator: SafetyValidator,
    config: EngineConfig,
}

impl<S: TargetSource> Purger<S> {
    /// Purger that deletes without asking and keeps every classified object.
    pub fn new(source: S, stores: Arc<BucketStores>, config: EngineConfig) -> Self {
        let validator = SafetyValidator::new(config.partial_suffix.clone());
        Self {
            resolver: CandidateResolver::new(source),
            stores,
            gate: ConfirmationGate::unattended(),
            filter: ObjectFilter::default(),
            validator,
            config,
        }
    }

    pub fn with_gate(mut self, gate: ConfirmationGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_filter(mut self, filter: ObjectFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Resolve `criteria` and purge every matching target.
    ///
    /// Stops at the first fatal error. Targets handled before it keep their
    /// deletions.
    pub async fn run(&mut self, criteria: &PurgeCriteria) -> Result<PurgeReport, PurgeError> {
        let targets = self.resolver.resolve(criteria).await?;
        let mut report = PurgeReport {
            dry_run: self.config.dry_run,
            ..Default::default()
        };

        if targets.is_empty() {
            info!("No module caches to purge");
            return Ok(report);
        }

        let total = targets.len();
        for (index, target) in targets.into_iter().enumerate() {
            info!(
                module = index + 1,
                modules_count = total,
                target = %target,
                "Processing module"
            );
            let target_report = self.purge_target(target).await?;
            report.totals += target_report.counters;
            report.targets.push(target_report);
        }

        report.totals.log("Purge complete");
        Ok(report)
    }

    /// List, check and delete the objects of a single target.
    pub async fn purge_target(&mut self, target: PurgeTarget) -> Result<TargetReport, PurgeError> {
        let started = Instant::now();
        let counters = RunCounters::new();
        let store = self
            .stores
            .store_for(&target.bucket)
            .map_err(|source| PurgeError::Storage {
                bucket: target.bucket.clone(),
                source,
            })?;

        let candidates = self.collect_candidates(store.as_ref(), &target, &counters).await?;
        let candidate_bytes: u64 = candidates.iter().map(|record| record.size_bytes).sum();

        let outcome = if candidates.is_empty() {
            info!(target = %target, "Nothing to purge for module");
            TargetOutcome::NothingToPurge
        } else {
            info!(
                target = %target,
                candidates = candidates.len(),
                candidate_mb = %CountersSummary::format_mb(candidate_bytes),
                "Module ready to purge"
            );

            if self.config.dry_run {
                for record in &candidates {
                    debug!(key = %record.key, size_bytes = record.size_bytes, "[DRY-RUN] Would delete file");
                }
                TargetOutcome::DryRun
            } else if !self.gate.check(&target, candidates.len(), candidate_bytes)? {
                TargetOutcome::Declined
            } else {
                let shared_target = Arc::new(target.clone());
                let jobs = candidates
                    .iter()
                    .map(|record| DeleteJob {
                        target: Arc::clone(&shared_target),
                        key: record.key.clone(),
                        size_bytes: record.size_bytes,
                    })
                    .collect();
                let deleter = Arc::new(ObjectStoreDeleter::new(store));
                DeletionPool::run(self.config.pool, deleter, counters.clone(), jobs).await;
                TargetOutcome::Purged
            }
        };

        let summary = counters.summary();
        let elapsed = started.elapsed();
        if outcome == TargetOutcome::Purged {
            info!(
                target = %target,
                elapsed = ?elapsed,
                deleted = summary.deleted,
                skipped = summary.skipped,
                reclaimed_mb = %CountersSummary::format_mb(summary.bytes_reclaimed),
                "Module purged"
            );
        }

        Ok(TargetReport {
            target,
            outcome,
            candidates: candidates.len(),
            candidate_bytes,
            counters: summary,
            elapsed,
        })
    }

    /// Every object of the target that should be deleted.
    ///
    /// Every listed object is checked against the target's retention boundary
    /// before it is classified, and the listing stops at the first one that is
    /// younger.
    async fn collect_candidates(
        &self,
        store: &dyn object_store::ObjectStore,
        target: &PurgeTarget,
        counters: &RunCounters,
    ) -> Result<Vec<ObjectRecord>, PurgeError> {
        let mut candidates = Vec::new();
        let mut violation = None;

        list_objects(store, &target.prefix(), &self.config.list, |record| {
            counters.record_considered();
            if let Err(e) = self.validator.check(target, &record) {
                violation = Some(e);
                return ControlFlow::Break(());
            }

            let classification = match classify(&record.key) {
                Ok(classification) => classification,
                Err(e) => {
                    debug!(key = %record.key, error = %e, "Leaving unrecognized file alone");
                    counters.record_filtered_out();
                    return ControlFlow::Continue(());
                }
            };
            if self.filter.matches(&record, &classification) {
                candidates.push(record);
            } else {
                counters.record_filtered_out();
            }
            ControlFlow::Continue(())
        })
        .await?;

        match violation {
            Some(e) => Err(e),
            None => Ok(candidates),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{DateTime, Utc};
    use common::config::{DeclinePolicy, StorageConfig};
    use common::metadata::{ModuleCache, StaleModuleQuery};
    use object_store::memory::InMemory;
    use object_store::path::Path as ObjectPath;
    use object_store::{ObjectStore, PutPayload};

    use crate::codec::ArtifactKind;
    use crate::confirm::{Decision, MockConfirmer};
    use crate::filter::BlockRange;

    struct StaticSource(Vec<ModuleCache>);

    #[async_trait]
    impl TargetSource for StaticSource {
        async fn stale_module_caches(
            &self,
            _query: &StaleModuleQuery<'_>,
        ) -> Result<Vec<ModuleCache>, sqlx::Error> {
            Ok(self.0.clone())
        }
    }

    fn module(subfolder: &str, boundary: DateTime<Utc>) -> ModuleCache {
        ModuleCache {
            bucket: "caches".to_string(),
            network: "eth".to_string(),
            subfolder: subfolder.to_string(),
            youngest_file_creation_date: boundary,
        }
    }

    fn criteria() -> PurgeCriteria {
        PurgeCriteria::Age {
            scope: "eth".to_string(),
            max_age: Duration::ZERO,
        }
    }

    async fn put(store: &InMemory, key: &str, size: usize) {
        store
            .put(&ObjectPath::from(key), PutPayload::from(Bytes::from(vec![0u8; size])))
            .await
            .unwrap();
    }

    async fn keys(store: &InMemory) -> Vec<String> {
        use futures::TryStreamExt;
        let mut keys: Vec<String> = store
            .list(None)
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await
            .unwrap();
        keys.sort();
        keys
    }

    fn stores_with(store: Arc<InMemory>) -> Arc<BucketStores> {
        let stores = BucketStores::new(StorageConfig::in_memory());
        stores.register("caches", store);
        Arc::new(stores)
    }

    fn engine_config() -> EngineConfig {
        EngineConfig {
            pool: PoolConfig {
                workers: 4,
                queue_capacity: 8,
                delete_timeout: Duration::from_secs(1),
                retry_backoff: Duration::from_millis(1),
                progress_interval: 100,
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_purges_old_files_and_skips_unrecognized_ones() {
        let store = Arc::new(InMemory::new());
        put(&store, "eth/mod/0000000000-0000001000.output.zst", 10).await;
        put(&store, "eth/mod/0000001000-0000000000.kv.zst", 20).await;
        put(&store, "eth/mod/README.txt", 5).await;
        put(&store, "eth/other/0000000000-0000001000.output.zst", 10).await;
        let boundary = Utc::now() + chrono::Duration::seconds(60);

        let mut purger = Purger::new(
            StaticSource(vec![module("mod", boundary)]),
            stores_with(store.clone()),
            engine_config(),
        );
        let report = purger.run(&criteria()).await.unwrap();

        assert_eq!(report.targets.len(), 1);
        assert_eq!(report.targets[0].outcome, TargetOutcome::Purged);
        assert_eq!(report.totals.considered, 3);
        assert_eq!(report.totals.filtered_out, 1);
        assert_eq!(report.totals.deleted, 2);
        assert_eq!(report.totals.bytes_reclaimed, 30);
        assert_eq!(
            keys(&store).await,
            vec!["eth/mod/README.txt", "eth/other/0000000000-0000001000.output.zst"]
        );
    }

    #[tokio::test]
    async fn test_dry_run_deletes_nothing() {
        let store = Arc::new(InMemory::new());
        put(&store, "eth/mod/0000000000-0000001000.output.zst", 10).await;
        let boundary = Utc::now() + chrono::Duration::seconds(60);

        let config = EngineConfig {
            dry_run: true,
            ..engine_config()
        };
        let mut purger = Purger::new(
            StaticSource(vec![module("mod", boundary)]),
            stores_with(store.clone()),
            config,
        );
        let report = purger.run(&criteria()).await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.targets[0].outcome, TargetOutcome::DryRun);
        assert_eq!(report.candidate_totals(), (1, 10));
        assert_eq!(report.totals.deleted, 0);
        assert_eq!(keys(&store).await.len(), 1);
    }

    #[tokio::test]
    async fn test_violation_leaves_target_untouched() {
        let store = Arc::new(InMemory::new());
        put(&store, "eth/mod/0000000000-0000001000.output.zst", 10).await;
        put(&store, "eth/mod/0000001000-0000002000.output.zst", 10).await;
        let boundary = Utc::now() - chrono::Duration::days(1);

        let mut purger = Purger::new(
            StaticSource(vec![module("mod", boundary)]),
            stores_with(store.clone()),
            engine_config(),
        );
        let err = purger.run(&criteria()).await.unwrap_err();

        assert!(err.is_consistency_violation());
        assert_eq!(keys(&store).await.len(), 2);
    }

    #[tokio::test]
    async fn test_poisoned_window_filter() {
        let store = Arc::new(InMemory::new());
        put(&store, "eth/mod/0000000000-0000001000.output.zst", 1).await;
        put(&store, "eth/mod/0000001000-0000002000.output.zst", 1).await;
        put(&store, "eth/mod/0000002000-0000001000.kv.zst", 1).await;
        put(&store, "eth/mod/0000003000-0000004000.output.zst", 1).await;
        let boundary = Utc::now() + chrono::Duration::seconds(60);

        let filter = ObjectFilter {
            kinds: vec![ArtifactKind::Output],
            block_range: Some(BlockRange::new(1500, 2500).unwrap()),
            exclude_after: None,
        };
        let mut purger = Purger::new(
            StaticSource(vec![module("mod", boundary)]),
            stores_with(store.clone()),
            engine_config(),
        )
        .with_filter(filter);
        let report = purger.run(&criteria()).await.unwrap();

        assert_eq!(report.totals.deleted, 1);
        assert_eq!(report.totals.filtered_out, 3);
        assert!(
            !keys(&store)
                .await
                .contains(&"eth/mod/0000001000-0000002000.output.zst".to_string())
        );
    }

    #[tokio::test]
    async fn test_files_written_after_cutoff_survive_poisoned_purge() {
        let store = Arc::new(InMemory::new());
        put(&store, "eth/mod/0000001000-0000002000.output.zst", 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let cutoff = Utc::now();
        tokio::time::sleep(Duration::from_millis(20)).await;
        put(&store, "eth/mod/0000001500-0000001600.output.zst", 1).await;
        let boundary = Utc::now() + chrono::Duration::seconds(60);

        let filter = ObjectFilter {
            kinds: vec![],
            block_range: Some(BlockRange::new(1000, 2000).unwrap()),
            exclude_after: Some(cutoff),
        };
        let mut purger = Purger::new(
            StaticSource(vec![module("mod", boundary)]),
            stores_with(store.clone()),
            engine_config(),
        )
        .with_filter(filter);
        let report = purger.run(&criteria()).await.unwrap();

        assert_eq!(report.totals.deleted, 1);
        assert_eq!(report.totals.filtered_out, 1);
        assert_eq!(
            keys(&store).await,
            vec!["eth/mod/0000001500-0000001600.output.zst"]
        );
    }

    async fn old_files_then_boundary(store: &InMemory) -> DateTime<Utc> {
        put(store, "eth/mod/0000001000-0000002000.output.zst", 1).await;
        put(store, "eth/mod/0000002000-0000003000.output.zst", 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let boundary = Utc::now();
        tokio::time::sleep(Duration::from_millis(20)).await;
        boundary
    }

    async fn poisoned_run(store: Arc<InMemory>, boundary: DateTime<Utc>) -> PurgeError {
        let filter = ObjectFilter {
            kinds: vec![ArtifactKind::Output],
            block_range: Some(BlockRange::new(1500, 1600).unwrap()),
            exclude_after: None,
        };
        let mut purger = Purger::new(
            StaticSource(vec![module("mod", boundary)]),
            stores_with(store),
            engine_config(),
        )
        .with_filter(filter);
        purger.run(&criteria()).await.unwrap_err()
    }

    #[tokio::test]
    async fn test_newer_file_outside_window_halts_the_run() {
        let store = Arc::new(InMemory::new());
        let boundary = old_files_then_boundary(&store).await;
        put(&store, "eth/mod/0000005000-0000006000.output.zst", 1).await;

        let err = poisoned_run(store.clone(), boundary).await;

        match err {
            PurgeError::ConsistencyViolation { key, .. } => {
                assert_eq!(key, "eth/mod/0000005000-0000006000.output.zst");
            }
            other => panic!("expected a consistency violation, got {other}"),
        }
        assert_eq!(keys(&store).await.len(), 3);
    }

    #[tokio::test]
    async fn test_newer_unrecognized_file_halts_the_run() {
        let store = Arc::new(InMemory::new());
        let boundary = old_files_then_boundary(&store).await;
        put(&store, "eth/mod/manifest.json", 1).await;

        let err = poisoned_run(store.clone(), boundary).await;

        assert!(err.is_consistency_violation());
        assert_eq!(keys(&store).await.len(), 3);
    }

    #[tokio::test]
    async fn test_purges_module_with_special_characters_in_path() {
        let store = Arc::new(InMemory::new());
        put(&store, "eth/mod#1/0000000000-0000001000.output.zst", 10).await;
        put(&store, "eth/mod#1/0000001000-0000002000.output.zst", 10).await;
        let boundary = Utc::now() + chrono::Duration::seconds(60);

        let mut purger = Purger::new(
            StaticSource(vec![module("mod#1", boundary)]),
            stores_with(store.clone()),
            engine_config(),
        );
        let report = purger.run(&criteria()).await.unwrap();

        assert_eq!(report.totals.deleted, 2);
        assert_eq!(report.totals.skipped, 0);
        assert!(keys(&store).await.is_empty());
    }

    #[tokio::test]
    async fn test_declined_target_is_skipped() {
        let store = Arc::new(InMemory::new());
        put(&store, "eth/a/0000000000-0000001000.output.zst", 1).await;
        put(&store, "eth/b/0000000000-0000001000.output.zst", 1).await;
        let boundary = Utc::now() + chrono::Duration::seconds(60);

        let mut confirmer = MockConfirmer::new();
        let mut answers = vec![Decision::Yes, Decision::No];
        confirmer
            .expect_confirm()
            .times(2)
            .returning(move |_| Ok(answers.pop().unwrap_or(Decision::No)));
        // pops "No" first: module a is declined, module b is purged
        let gate = ConfirmationGate::new(Box::new(confirmer), DeclinePolicy::SkipTarget);

        let mut purger = Purger::new(
            StaticSource(vec![module("a", boundary), module("b", boundary)]),
            stores_with(store.clone()),
            engine_config(),
        )
        .with_gate(gate);
        let report = purger.run(&criteria()).await.unwrap();

        assert_eq!(report.targets[0].outcome, TargetOutcome::Declined);
        assert_eq!(report.targets[1].outcome, TargetOutcome::Purged);
        assert_eq!(report.purged_targets(), 1);
        assert_eq!(
            keys(&store).await,
            vec!["eth/a/0000000000-0000001000.output.zst"]
        );
    }

    #[tokio::test]
    async fn test_no_targets() {
        let mut purger = Purger::new(
            StaticSource(vec![]),
            stores_with(Arc::new(InMemory::new())),
            engine_config(),
        );
        let report = purger.run(&criteria()).await.unwrap();

        assert!(report.targets.is_empty());
        assert_eq!(report.totals, CountersSummary::default());
    }
}
