use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Common CLI arguments shared by the purger binaries
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Commands that inspect the configuration instead of running a purge
#[derive(Subcommand, Debug, Clone)]
pub enum CommonCommands {
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use crate::metadata::is_valid_table_identifier;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Initialize logging based on CLI arguments. `RUST_LOG` wins when set.
    pub fn init_logging(args: &CommonArgs) {
        let level = if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("Module Purger Configuration:");
            println!("============================");
            println!("Database DSN: {}", config.database.dsn);
            println!("Files table: {}", config.database.files_table);
            println!("Excluded filetype: {}", config.database.excluded_filetype);
            println!("Storage URL template: {}", config.storage.url_template);
            println!(
                "Storage retries: {} (backoff {:?}..{:?})",
                config.storage.retry.max_retries,
                config.storage.retry.init_backoff,
                config.storage.retry.max_backoff
            );
            println!("Workers: {}", config.purge.workers);
            println!("Queue capacity: {}", config.purge.queue_capacity);
            println!("Delete timeout: {:?}", config.purge.delete_timeout);
            println!("Listing timeout: {:?}", config.purge.listing_timeout);
            match config.purge.listing_limit {
                Some(limit) => println!("Listing limit: {limit}"),
                None => println!("Listing limit: unbounded"),
            }
            println!(
                "Max age: {}",
                humantime::format_duration(config.purge.max_age)
            );
            println!("Partial-write suffix: {}", config.purge.partial_suffix);
            println!("Dry run: {}", config.purge.dry_run);
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");

        if config.database.dsn.is_empty() {
            anyhow::bail!("Database DSN cannot be empty");
        }

        if !is_valid_table_identifier(&config.database.files_table) {
            anyhow::bail!(
                "Invalid files table identifier: {:?}",
                config.database.files_table
            );
        }

        let template = &config.storage.url_template;
        if template.is_empty() {
            anyhow::bail!("Storage URL template cannot be empty");
        }
        if !template.starts_with("memory:") && !template.contains("{bucket}") {
            anyhow::bail!("Storage URL template must contain a {{bucket}} placeholder: {template}");
        }

        let purge = &config.purge;
        if purge.workers == 0 {
            anyhow::bail!("purge.workers must be positive");
        }
        if purge.queue_capacity == 0 {
            anyhow::bail!("purge.queue_capacity must be positive");
        }
        if purge.progress_interval == 0 {
            anyhow::bail!("purge.progress_interval must be positive");
        }
        if purge.delete_timeout.is_zero() || purge.listing_timeout.is_zero() {
            anyhow::bail!("purge timeouts must be positive");
        }
        if purge.partial_suffix.is_empty() {
            anyhow::bail!("purge.partial_suffix cannot be empty");
        }

        log::info!("Configuration validation passed");
        Ok(())
    }

    /// Handle commands that don't run a purge
    pub fn handle_common_command(command: &CommonCommands, config: &Configuration) -> Result<()> {
        match command {
            CommonCommands::Config { json } => display_config(config, *json),
            CommonCommands::Validate => validate_config(config),
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(())
            }
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}
