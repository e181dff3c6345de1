//! Migration pipeline orchestration.
//!
//! A run moves through `Init -> VerifySchema -> Migrate -> Reconcile -> Done`.
//! Failing to reach either store or to verify the destination table ends it
//! in `Aborted`. Both connections are released on every path.

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fmt;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MigrationConfig;
use crate::connectors::{create_source, SourceConnector};
use crate::error::{Error, Result};
use crate::reader::BatchReader;
use crate::record::BookField;
use crate::schema::ColumnSet;
use crate::sink::{DestinationConnector, PostgresDestination, TableRef};
use crate::transform::Transformer;
use crate::writer::{BatchWriter, WriteOutcome};

/// Where a run is, or where it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    /// Connecting to both stores.
    Init,
    /// Checking the destination table and its columns.
    VerifySchema,
    /// Moving batches.
    Migrate,
    /// Comparing source and destination counts.
    Reconcile,
    /// Finished (possibly with a partial migration).
    Done,
    /// Stopped before any batch was written.
    Aborted,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::VerifySchema => "verify_schema",
            Self::Migrate => "migrate",
            Self::Reconcile => "reconcile",
            Self::Done => "done",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Counters accumulated over one run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationCounters {
    /// Source documents at the start of the run.
    pub source_total: u64,
    /// Documents read from the source.
    pub processed: u64,
    /// Rows sent in committed batches, duplicates included.
    pub migrated: u64,
    /// Rows the destination actually inserted.
    pub inserted: u64,
    /// Documents skipped because they could not be transformed.
    pub failed_transform: u64,
    /// Batches rolled back.
    pub failed_batches: u64,
    /// Batches read.
    pub batches: u64,
}

/// Source and destination counts after the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// Source documents counted at the start of the run.
    pub source_count: u64,
    /// Destination rows after the run.
    pub destination_count: u64,
}

impl Reconciliation {
    /// Destination rows as a percentage of source documents.
    ///
    /// `None` when the source is empty.
    #[must_use]
    pub fn percentage(&self) -> Option<f64> {
        if self.source_count == 0 {
            return None;
        }
        Some(self.destination_count as f64 * 100.0 / self.source_count as f64)
    }

    /// True when both sides hold the same number of records.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.source_count == self.destination_count
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// State the run ended in.
    pub state: MigrationState,
    /// Accumulated counters.
    pub counters: MigrationCounters,
    /// Count comparison, absent in dry runs or if the destination count failed.
    pub reconciliation: Option<Reconciliation>,
    /// Wall time in seconds.
    pub duration_secs: f64,
    /// The run was stopped between batches.
    pub cancelled: bool,
    /// Nothing was written.
    pub dry_run: bool,
}

impl MigrationReport {
    fn new(dry_run: bool) -> Self {
        Self {
            state: MigrationState::Init,
            counters: MigrationCounters::default(),
            reconciliation: None,
            duration_secs: 0.0,
            cancelled: false,
            dry_run,
        }
    }

    /// Documents read per second.
    #[must_use]
    pub fn throughput(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.counters.processed as f64 / self.duration_secs
        } else {
            0.0
        }
    }
}

/// What `check` found without writing anything.
#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    /// Source description.
    pub source: String,
    /// Documents in the source.
    pub source_count: u64,
    /// Destination table.
    pub table: String,
    /// Discovered columns, sorted by name.
    pub columns: Vec<String>,
    /// Columns that will receive data.
    pub writable_columns: Vec<String>,
    /// Rows already in the table.
    pub destination_count: u64,
}

/// Migration pipeline.
pub struct Pipeline {
    config: MigrationConfig,
    source: Box<dyn SourceConnector>,
    destination: Box<dyn DestinationConnector>,
    transformer: Transformer,
    cancel: CancellationToken,
    state: MigrationState,
}

impl Pipeline {
    /// Create a pipeline for the configured MongoDB source and PostgreSQL table.
    ///
    /// # Errors
    ///
    /// Returns an error if the source connector cannot be created.
    pub fn new(config: MigrationConfig) -> Result<Self> {
        let source = create_source(&config.source)?;
        let destination = Box::new(PostgresDestination::new(config.destination.clone()));
        Ok(Self::with_connectors(config, source, destination))
    }

    /// Create a pipeline over explicit connectors.
    pub fn with_connectors(
        config: MigrationConfig,
        source: Box<dyn SourceConnector>,
        destination: Box<dyn DestinationConnector>,
    ) -> Self {
        let transformer = Transformer::new(config.options.field_overrides.clone());
        Self {
            config,
            source,
            destination,
            transformer,
            cancel: CancellationToken::new(),
            state: MigrationState::Init,
        }
    }

    /// Stop between batches once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> MigrationState {
        self.state
    }

    fn table(&self) -> TableRef {
        TableRef::new(
            &self.config.destination.schema,
            &self.config.destination.table,
        )
    }

    /// Run the migration.
    ///
    /// Batch and record failures are counted in the report. Only failures
    /// that prevent the run from starting are returned as errors.
    ///
    /// # Errors
    ///
    /// Returns an error if either store is unreachable, the destination table
    /// is missing or unusable, or the source cannot be read.
    pub async fn run(&mut self) -> Result<MigrationReport> {
        let start = Instant::now();
        let mut report = MigrationReport::new(self.config.options.dry_run);

        info!(
            "Starting migration from {} to {}",
            self.config.source.describe(),
            self.table()
        );

        let result = self.execute(&mut report).await;
        self.release().await;
        report.duration_secs = start.elapsed().as_secs_f64();

        match result {
            Ok(()) => {
                self.state = MigrationState::Done;
                report.state = MigrationState::Done;
                let c = &report.counters;
                info!(
                    "Migration complete: {} processed, {} migrated ({} inserted), \
                     {} failed to transform, {} batches rolled back in {:.2}s ({:.0} docs/sec)",
                    c.processed,
                    c.migrated,
                    c.inserted,
                    c.failed_transform,
                    c.failed_batches,
                    report.duration_secs,
                    report.throughput()
                );
                Ok(report)
            }
            Err(e) => {
                error!("Migration aborted in state {}: {}", self.state, e);
                self.state = MigrationState::Aborted;
                Err(e)
            }
        }
    }

    /// Connect, verify the table and count both sides without writing.
    ///
    /// # Errors
    ///
    /// Returns an error under the same conditions as a run that aborts.
    pub async fn preflight(&mut self) -> Result<PreflightReport> {
        let result = self.inspect().await;
        self.release().await;
        result
    }

    async fn inspect(&mut self) -> Result<PreflightReport> {
        self.connect().await?;
        let columns = self.verify_schema().await?;
        let table = self.table();

        let source_count = self.source.count().await?;
        let destination_count = self.destination.count_rows(&table).await?;

        Ok(PreflightReport {
            source: self.config.source.describe(),
            source_count,
            table: table.to_string(),
            columns: columns.names().map(str::to_string).collect(),
            writable_columns: columns
                .writable_fields()
                .iter()
                .map(|f| f.column_name().to_string())
                .collect(),
            destination_count,
        })
    }

    async fn connect(&mut self) -> Result<()> {
        self.state = MigrationState::Init;
        self.source.connect().await?;
        self.destination.connect().await?;
        Ok(())
    }

    async fn verify_schema(&mut self) -> Result<ColumnSet> {
        self.state = MigrationState::VerifySchema;
        let table = self.table();

        let columns = self
            .destination
            .describe_table(&table)
            .await?
            .ok_or_else(|| Error::TableNotFound(table.to_string()))?;
        let columns = ColumnSet::new(table.to_string(), columns)?;

        info!(
            "Destination table {} has columns: {}",
            table,
            columns.names().collect::<Vec<_>>().join(", ")
        );
        let skipped: Vec<&str> = BookField::ALL
            .into_iter()
            .filter(|f| !columns.contains(f.column_name()))
            .map(|f| f.column_name())
            .collect();
        if !skipped.is_empty() {
            info!("Fields not present in {} will be dropped: {}", table, skipped.join(", "));
        }

        Ok(columns)
    }

    async fn execute(&mut self, report: &mut MigrationReport) -> Result<()> {
        self.connect().await?;
        let columns = self.verify_schema().await?;

        self.state = MigrationState::Migrate;
        report.state = MigrationState::Migrate;
        self.migrate(&columns, report).await?;

        if report.dry_run {
            info!("Dry run: reconciliation skipped");
            return Ok(());
        }

        self.state = MigrationState::Reconcile;
        report.state = MigrationState::Reconcile;
        report.reconciliation = self.reconcile(report.counters.source_total).await;
        Ok(())
    }

    async fn migrate(&self, columns: &ColumnSet, report: &mut MigrationReport) -> Result<()> {
        let options = &self.config.options;
        let table = self.table();

        let mut reader = BatchReader::open(
            self.source.as_ref(),
            options.batch_size,
            options.retry_config(),
            options.batch_timeout(),
        )
        .await?;
        report.counters.source_total = reader.total();

        let writer = BatchWriter::new(
            self.destination.as_ref(),
            table,
            options.conflict_column,
            options.retry_config(),
            options.batch_timeout(),
        );

        if options.dry_run {
            info!("Dry run mode - not writing to destination");
        }

        let progress = if options.show_progress {
            create_progress_bar(reader.total())
        } else {
            ProgressBar::hidden()
        };

        loop {
            if self.cancel.is_cancelled() {
                warn!(
                    "Cancellation requested, stopping after {} of {} documents",
                    reader.emitted(),
                    reader.total()
                );
                report.cancelled = true;
                break;
            }

            let Some(batch) = reader.next_batch().await? else {
                break;
            };
            let counters = &mut report.counters;
            counters.batches += 1;
            counters.processed += batch.fetched() as u64;

            for rejected in &batch.rejected {
                warn!(
                    batch = batch.index,
                    position = rejected.position,
                    "Error reading document: {}",
                    rejected.reason
                );
            }
            let transformed = self.transformer.transform_batch(&batch.records);
            for failure in &transformed.failures {
                warn!(
                    batch = batch.index,
                    record = %failure.source_id,
                    "Error transforming document: {}",
                    failure.error
                );
            }
            counters.failed_transform +=
                (transformed.failures.len() + batch.rejected.len()) as u64;
            if transformed.rows.is_empty() {
                warn!(
                    batch = batch.index,
                    "No documents were successfully transformed in this batch"
                );
            }

            let rows: Vec<_> = transformed
                .rows
                .into_iter()
                .map(|row| columns.filter(row))
                .collect();

            if options.dry_run {
                if let Some(sample) = rows.first() {
                    debug!(batch = batch.index, "Would insert e.g. {}", sample);
                }
                info!(
                    batch = batch.index,
                    "Dry run: would insert {} records into {}",
                    rows.len(),
                    writer.table()
                );
                counters.migrated += rows.len() as u64;
            } else {
                match writer.write(batch.index, rows).await {
                    WriteOutcome::Committed {
                        attempted,
                        inserted,
                    } => {
                        counters.migrated += attempted;
                        counters.inserted += inserted;
                    }
                    WriteOutcome::RolledBack { .. } => counters.failed_batches += 1,
                }
            }

            progress.inc(batch.fetched() as u64);
        }

        if report.cancelled {
            progress.abandon_with_message("Migration cancelled");
        } else {
            progress.finish_with_message("Migration complete");
        }
        Ok(())
    }

    async fn reconcile(&self, source_count: u64) -> Option<Reconciliation> {
        let table = self.table();
        let destination_count = match self.destination.count_rows(&table).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Could not count rows in {} for validation: {}", table, e);
                return None;
            }
        };

        let reconciliation = Reconciliation {
            source_count,
            destination_count,
        };
        log_reconciliation(&reconciliation);
        Some(reconciliation)
    }

    async fn release(&mut self) {
        if let Err(e) = self.source.close().await {
            warn!("Error closing {} source: {}", self.source.source_type(), e);
        }
        if let Err(e) = self.destination.close().await {
            warn!(
                "Error closing {} destination: {}",
                self.destination.destination_type(),
                e
            );
        }
        info!("Database connections closed");
    }
}

fn log_reconciliation(r: &Reconciliation) {
    if r.is_complete() {
        info!(
            "Validation successful: {} source documents, {} destination records",
            r.source_count, r.destination_count
        );
        return;
    }
    match r.percentage() {
        Some(pct) if r.destination_count < r.source_count => warn!(
            "Validation shows partial migration: {}/{} records migrated ({:.1}% complete)",
            r.destination_count, r.source_count, pct
        ),
        Some(pct) => warn!(
            "Validation shows more destination records than source documents: {}/{} ({:.1}%)",
            r.destination_count, r.source_count, pct
        ),
        None => warn!(
            "Validation mismatch: source is empty but destination holds {} records",
            r.destination_count
        ),
    }
}

fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = if total > 0 {
        ProgressBar::new(total)
    } else {
        ProgressBar::new_spinner()
    };

    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    pb
}
