//! Module cache purger
//!
//! Deletes module caches that have not been written for a while, or the
//! artifacts of a block window produced by a faulty module version.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use common::cli::utils::{handle_common_command, init_logging, load_config, validate_config};
use common::cli::{CommonArgs, CommonCommands};
use common::config::Configuration;
use common::{BucketStores, MetadataStore};
use purger::{
    ArtifactKind, BlockRange, ConfirmationGate, CountersSummary, EngineConfig, ObjectFilter,
    PurgeCriteria, PurgeReport, Purger, TargetOutcome, TerminalConfirmer,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "module-purger", author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Purge module caches whose youngest file is older than the maximum age
    Purge {
        #[arg(long, help = "Network the module caches belong to")]
        network: String,

        #[arg(long, help = "Only purge the module cache stored under this sub path")]
        subfolder: Option<String>,

        #[arg(long, requires = "subfolder", help = "Only purge the most overdue match")]
        oldest_only: bool,

        #[arg(long, value_parser = humantime::parse_duration, help = "Maximum age, e.g. 30d")]
        max_age: Option<Duration>,

        #[command(flatten)]
        run: RunArgs,
    },
    /// Purge the artifacts overlapping a block window
    Poisoned {
        #[arg(long, help = "Network the module caches belong to")]
        network: String,

        #[arg(long, help = "Only look at the module cache stored under this sub path")]
        subfolder: Option<String>,

        #[arg(long, help = "First poisoned block")]
        start_block: u64,

        #[arg(long, help = "Last poisoned block")]
        end_block: u64,

        #[arg(long = "kind", help = "Artifact kind to purge: output, kv or index (repeatable)")]
        kinds: Vec<ArtifactKind>,

        #[arg(long, value_parser = parse_rfc3339, help = "Leave files written after this RFC 3339 instant alone")]
        exclude_after: Option<DateTime<Utc>>,

        #[arg(long, value_parser = humantime::parse_duration, help = "Minimum idle time of the module caches [default: 0s]")]
        max_age: Option<Duration>,

        #[command(flatten)]
        run: RunArgs,
    },
    #[command(flatten)]
    Common(CommonCommands),
}

/// Flags shared by the purge commands, they override the configuration.
#[derive(Args, Debug, Clone)]
struct RunArgs {
    #[arg(long, help = "Metadata database DSN")]
    database_dsn: Option<String>,

    #[arg(long, help = "List and validate without deleting")]
    dry_run: bool,

    #[arg(long, help = "Do not ask for confirmation")]
    force: bool,

    #[arg(long, help = "Number of concurrent delete workers")]
    workers: Option<usize>,

    #[arg(long, help = "Maximum number of files listed per module cache")]
    list_limit: Option<usize>,
}

impl RunArgs {
    fn apply(&self, config: &mut Configuration) {
        if let Some(dsn) = &self.database_dsn {
            config.database.dsn = dsn.clone();
        }
        if self.dry_run {
            config.purge.dry_run = true;
        }
        if let Some(workers) = self.workers {
            config.purge.workers = workers;
        }
        if let Some(limit) = self.list_limit {
            config.purge.listing_limit = Some(limit);
        }
    }
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|instant| instant.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 timestamp {value:?}: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.common);

    let mut config = load_config(cli.common.config.as_ref())?;

    let (criteria, filter, run) = match cli.command {
        Command::Common(command) => return handle_common_command(&command, &config),
        Command::Purge {
            network,
            subfolder,
            oldest_only,
            max_age,
            run,
        } => {
            let max_age = max_age.unwrap_or(config.purge.max_age);
            let criteria = match subfolder {
                Some(sub_path) => PurgeCriteria::Subfolder {
                    sub_path,
                    scope: Some(network),
                    max_age,
                    oldest_only,
                },
                None => PurgeCriteria::Age {
                    scope: network,
                    max_age,
                },
            };
            (criteria, ObjectFilter::default(), run)
        }
        Command::Poisoned {
            network,
            subfolder,
            start_block,
            end_block,
            kinds,
            exclude_after,
            max_age,
            run,
        } => {
            let max_age = max_age.unwrap_or(Duration::ZERO);
            let criteria = match subfolder {
                Some(sub_path) => PurgeCriteria::Subfolder {
                    sub_path,
                    scope: Some(network),
                    max_age,
                    oldest_only: false,
                },
                None => PurgeCriteria::Age {
                    scope: network,
                    max_age,
                },
            };
            let filter = ObjectFilter {
                kinds,
                block_range: Some(BlockRange::new(start_block, end_block)?),
                exclude_after,
            };
            (criteria, filter, run)
        }
    };

    run.apply(&mut config);
    validate_config(&config).context("Invalid configuration")?;

    let report = purge(&config, &criteria, filter, run.force).await?;
    print_summary(&report);
    Ok(())
}

async fn purge(
    config: &Configuration,
    criteria: &PurgeCriteria,
    filter: ObjectFilter,
    force: bool,
) -> Result<PurgeReport> {
    let metadata = MetadataStore::connect(&config.database)
        .await
        .context("Failed to connect to the metadata database")?;
    let stores = Arc::new(BucketStores::new(config.storage.clone()));

    let gate = if force {
        ConfirmationGate::unattended()
    } else {
        ConfirmationGate::new(
            Box::new(TerminalConfirmer::new()),
            config.purge.decline_policy,
        )
    };

    tracing::info!(
        dry_run = config.purge.dry_run,
        workers = config.purge.workers,
        "Starting purge"
    );

    let mut purger = Purger::new(metadata, stores, EngineConfig::from(&config.purge))
        .with_gate(gate)
        .with_filter(filter);
    let report = purger.run(criteria).await.context("Purge failed")?;
    Ok(report)
}

fn print_summary(report: &PurgeReport) {
    for target in &report.targets {
        let status = match target.outcome {
            TargetOutcome::Purged => "purged",
            TargetOutcome::DryRun => "dry run",
            TargetOutcome::Declined => "declined",
            TargetOutcome::NothingToPurge => "nothing to purge",
        };
        println!(
            "{}: {} ({} files, {} MB, {} deleted, {} skipped, {:.1?})",
            target.target,
            status,
            target.candidates,
            CountersSummary::format_mb(target.candidate_bytes),
            target.counters.deleted,
            target.counters.skipped,
            target.elapsed
        );
    }

    if report.dry_run {
        let (files, bytes) = report.candidate_totals();
        println!(
            "Dry run: {} module caches, {} files ({} MB) would be purged",
            report.targets.len(),
            files,
            CountersSummary::format_mb(bytes)
        );
    } else {
        println!(
            "Purged {} of {} module caches: {} files deleted, {} MB reclaimed, {} skipped",
            report.purged_targets(),
            report.targets.len(),
            report.totals.deleted,
            CountersSummary::format_mb(report.totals.bytes_reclaimed),
            report.totals.skipped
        );
    }
}
