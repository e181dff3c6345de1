//! MongoDB to PostgreSQL migration CLI
//!
//! Copies book documents into a PostgreSQL table in committed batches.
//! Pedantic lints relaxed for CLI ergonomics.

// CLI tool - relax pedantic lints for ergonomics
#![allow(clippy::pedantic)]

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mongo_pg_migrate::logging::{init_logging, DEFAULT_LOG_FILE};
use mongo_pg_migrate::{MigrationConfig, MigrationReport, Pipeline, SourceConfig};

#[derive(Parser)]
#[command(name = "mongo-pg-migrate")]
#[command(version)]
#[command(about = "Migrate book documents from MongoDB into PostgreSQL", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Run log file (appended to)
    #[arg(long, global = true, value_name = "FILE", default_value = DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    /// Do not write a run log file
    #[arg(long, global = true)]
    no_log_file: bool,

    /// PostgreSQL password override
    #[arg(long, global = true, env = "PGPASSWORD", hide_env_values = true)]
    pg_password: Option<String>,

    /// MongoDB connection string override
    #[arg(long, global = true, env = "MONGODB_URI", hide_env_values = true)]
    mongo_uri: Option<String>,

    /// MongoDB Data API key override
    #[arg(long, global = true, env = "MONGODB_DATA_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run migration from config file
    Run {
        /// Configuration file path
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// Dry run mode (transform and filter only, no writes)
        #[arg(long)]
        dry_run: bool,

        /// Batch size override
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Validate configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Connect to both stores, verify the table and show counts
    Check {
        /// Configuration file path
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Generate example configuration
    Init {
        /// Source type (mongodb, mongodb_data_api, json_file)
        #[arg(short, long, default_value = "mongodb")]
        source: String,

        /// Output file path
        #[arg(short, long, default_value = "migration.yaml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let writes_log = matches!(cli.command, Commands::Run { .. } | Commands::Check { .. });
    let log_file = (writes_log && !cli.no_log_file).then_some(cli.log_file.as_path());
    init_logging(cli.verbose, log_file)?;

    match &cli.command {
        Commands::Run {
            config,
            dry_run,
            batch_size,
        } => {
            let mut config = load_config(config, &cli)?;
            if *dry_run {
                config.options.dry_run = true;
            }
            if let Some(bs) = batch_size {
                config.options.batch_size = *bs;
            }
            config.validate()?;
            run_migration(config).await?;
        }
        Commands::Validate { config } => {
            validate_config(config, &cli)?;
        }
        Commands::Check { config } => {
            let config = load_config(config, &cli)?;
            config.validate()?;
            check(config).await?;
        }
        Commands::Init { source, output } => {
            generate_config(source, output)?;
        }
    }

    Ok(())
}

fn load_config(path: &Path, cli: &Cli) -> anyhow::Result<MigrationConfig> {
    info!("Loading configuration from {:?}", path);
    let mut config = MigrationConfig::from_file(path)?;

    if let Some(password) = &cli.pg_password {
        config.destination.password = password.clone();
    }
    match &mut config.source {
        SourceConfig::MongoDB(source) => {
            if let Some(uri) = &cli.mongo_uri {
                source.uri = uri.clone();
            }
        }
        SourceConfig::DataApi(source) => {
            if let Some(key) = &cli.api_key {
                source.api_key = key.clone();
            }
        }
        SourceConfig::JsonFile(_) => {}
    }

    Ok(config)
}

async fn run_migration(config: MigrationConfig) -> anyhow::Result<()> {
    let cancel = setup_signal_handler();
    let mut pipeline = Pipeline::new(config)?.with_cancellation(cancel);
    let report = pipeline.run().await?;

    print_report(&report);

    if report.cancelled {
        anyhow::bail!("migration cancelled before reading every document");
    }
    Ok(())
}

fn print_report(report: &MigrationReport) {
    let c = &report.counters;
    let title = if report.dry_run {
        "Dry Run Complete"
    } else if report.cancelled {
        "Migration Cancelled"
    } else {
        "Migration Complete"
    };

    println!("\n{}", title);
    println!("   Source documents:   {}", c.source_total);
    println!("   Processed:          {}", c.processed);
    println!("   Migrated:           {}", c.migrated);
    println!("   Inserted:           {}", c.inserted);
    println!("   Failed transforms:  {}", c.failed_transform);
    println!("   Rolled back batches: {}", c.failed_batches);
    println!("   Duration:           {:.2}s", report.duration_secs);
    println!("   Throughput:         {:.0} docs/sec", report.throughput());

    if let Some(r) = &report.reconciliation {
        let pct = r
            .percentage()
            .map_or_else(|| "n/a".to_string(), |p| format!("{:.1}%", p));
        println!(
            "   Reconciliation:     {}/{} ({})",
            r.destination_count, r.source_count, pct
        );
    }
}

fn validate_config(path: &Path, cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(path, cli)?;
    config.validate()?;

    println!("Configuration is valid!");
    println!("   Source:      {}", config.source.describe());
    println!(
        "   Destination: {}:{}/{} table {}.{}",
        config.destination.host,
        config.destination.port,
        config.destination.database,
        config.destination.schema,
        config.destination.table
    );
    println!("   Batch size:  {}", config.options.batch_size);
    match config.options.conflict_column {
        Some(column) => println!("   Duplicates:  skipped on {}", column),
        None => println!("   Duplicates:  not suppressed"),
    }

    Ok(())
}

async fn check(config: MigrationConfig) -> anyhow::Result<()> {
    let mut pipeline = Pipeline::new(config)?;
    let report = pipeline.preflight().await?;

    println!("\nPreflight Check");
    println!("   Source:            {}", report.source);
    println!("   Source documents:  {}", report.source_count);
    println!("   Table:             {}", report.table);
    println!("   Columns:           {}", report.columns.join(", "));
    println!("   Writable columns:  {}", report.writable_columns.join(", "));
    println!("   Existing rows:     {}", report.destination_count);

    Ok(())
}

fn generate_config(source: &str, output: &Path) -> anyhow::Result<()> {
    let template = match source.to_lowercase().as_str() {
        "mongodb" => MONGODB_TEMPLATE,
        "mongodb_data_api" | "data_api" => DATA_API_TEMPLATE,
        "json_file" | "json" => JSON_FILE_TEMPLATE,
        _ => anyhow::bail!(
            "unknown source type '{}' (supported: mongodb, mongodb_data_api, json_file)",
            source
        ),
    };

    std::fs::write(output, template)?;
    println!("Generated configuration: {:?}", output);
    println!(
        "   Edit the file and run: mongo-pg-migrate run --config {:?}",
        output
    );

    Ok(())
}

/// Cancels the returned token on SIGINT or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    use tokio::signal::unix::{signal, SignalKind};

    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    warn!("Received {}. Stopping after the current batch...", name);
                    token.cancel();
                });
            }
            Err(e) => warn!("Failed to install {} handler: {}", name, e),
        }
    }

    cancel_token
}

/// Cancels the returned token on Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl-C. Stopping after the current batch...");
            token.cancel();
        }
    });

    cancel_token
}

const MONGODB_TEMPLATE: &str = r#"# Migration Configuration - MongoDB Source
source:
  type: mongodb
  # Credentials in the URI are better supplied via the MONGODB_URI environment variable
  uri: mongodb://localhost:27017
  database: library
  collection: books
  server_selection_timeout_secs: 10

destination:
  host: localhost
  port: 5432
  user: postgres
  # password: prefer the PGPASSWORD environment variable
  database: library
  schema: public
  table: books

options:
  batch_size: 1000
  conflict_column: book_id  # null disables duplicate skipping
  batch_timeout_secs: 300
  max_retries: 3
  dry_run: false
  # Alternate source field names; each overrides the default for its column
  field_overrides:
    bookId: book_id
    bookName: book_name
    bookAuthors: book_authors
    isbnNumber: isbn_number
    bookCategory: book_category
    editionNumber: edition_number
    yearOfPublication: year_of_publication
"#;

const DATA_API_TEMPLATE: &str = r#"# Migration Configuration - MongoDB Atlas Data API Source
source:
  type: mongodb_data_api
  data_api_url: https://data.mongodb-api.com/app/<app-id>/endpoint/data/v1
  # api_key: prefer the MONGODB_DATA_API_KEY environment variable
  data_source: Cluster0
  database: library
  collection: books

destination:
  host: localhost
  port: 5432
  user: postgres
  database: library
  schema: public
  table: books

options:
  batch_size: 1000
  conflict_column: book_id
"#;

const JSON_FILE_TEMPLATE: &str = r#"# Migration Configuration - mongoexport JSON Source
source:
  type: json_file
  path: ./books.json
  # array_path: data.books  # when the documents sit inside an object

destination:
  host: localhost
  port: 5432
  user: postgres
  database: library
  schema: public
  table: books

options:
  batch_size: 1000
  conflict_column: book_id
"#;
