//! Batch-scoped writes with commit-or-rollback outcome.

use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::record::{BookField, DestinationRecord};
use crate::retry::{with_retry, with_timeout, RetryConfig};
use crate::sink::{total_rows, DestinationConnector, InsertPlan, TableRef};

/// Result of writing one batch.
#[derive(Debug)]
pub enum WriteOutcome {
    /// The batch was committed.
    Committed {
        /// Rows sent to the destination.
        attempted: u64,
        /// Rows the destination reports as inserted (after duplicate-skip).
        inserted: u64,
    },
    /// The batch failed. Nothing from it persisted unless the failure was an
    /// unacknowledged commit ([`Error::Commit`]).
    RolledBack {
        /// Why the insert failed.
        error: Error,
    },
}

/// Writes filtered rows to one table, one transaction per batch.
pub struct BatchWriter<'a> {
    destination: &'a dyn DestinationConnector,
    table: TableRef,
    conflict_column: Option<BookField>,
    retry: RetryConfig,
    timeout: Duration,
}

impl<'a> BatchWriter<'a> {
    /// Creates a writer for `table`.
    pub fn new(
        destination: &'a dyn DestinationConnector,
        table: TableRef,
        conflict_column: Option<BookField>,
        retry: RetryConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            destination,
            table,
            conflict_column,
            retry,
            timeout,
        }
    }

    /// Target table.
    #[must_use]
    pub fn table(&self) -> &TableRef {
        &self.table
    }

    /// Writes `rows` as batch `batch_index`.
    ///
    /// Failures never propagate: they are logged with the first row of the
    /// batch and reported as [`WriteOutcome::RolledBack`].
    ///
    /// A transient failure is retried only when every plan carries a conflict
    /// column. Without one, a commit that landed before its acknowledgement
    /// was lost would be inserted a second time.
    pub async fn write(&self, batch_index: u64, rows: Vec<DestinationRecord>) -> WriteOutcome {
        let plans = InsertPlan::group(rows, self.conflict_column);
        let attempted = total_rows(&plans) as u64;
        if attempted == 0 {
            return WriteOutcome::Committed {
                attempted: 0,
                inserted: 0,
            };
        }

        let destination = self.destination;
        let table = &self.table;
        let plans_ref = plans.as_slice();
        let retry = if plans.iter().all(|p| p.conflict_column.is_some()) {
            self.retry.clone()
        } else {
            debug!(
                batch = batch_index,
                "No conflict column on every insert plan, write will not be retried"
            );
            RetryConfig::no_retry()
        };
        let result = with_retry(&retry, "write_batch", || {
            with_timeout(
                self.timeout,
                "write_batch",
                destination.write_batch(table, plans_ref),
            )
        })
        .await;

        match result {
            Ok(inserted) => {
                info!(
                    batch = batch_index,
                    "Inserted {} records into table {}", inserted, self.table
                );
                if inserted < attempted {
                    info!(
                        batch = batch_index,
                        skipped = attempted - inserted,
                        "Duplicate rows skipped"
                    );
                }
                WriteOutcome::Committed {
                    attempted,
                    inserted,
                }
            }
            Err(e) => {
                error!(
                    batch = batch_index,
                    rows = attempted,
                    "Error inserting batch into {}, rolled back: {}",
                    self.table,
                    e
                );
                if let Some(sample) = plans.first().and_then(InsertPlan::first_row) {
                    error!(batch = batch_index, "Sample data that failed: {}", sample);
                }
                if matches!(e, Error::Commit(_)) {
                    warn!(
                        batch = batch_index,
                        "Commit was not acknowledged; rows of this batch may have persisted"
                    );
                }
                if e.to_string().contains("duplicate key") {
                    warn!(
                        "Duplicate key without a conflict clause; set options.conflict_column \
                         to a unique column of {}",
                        self.table
                    );
                }
                WriteOutcome::RolledBack { error: e }
            }
        }
    }
}
