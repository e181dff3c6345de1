//! Destination side of the migration.
//!
//! A destination exposes table metadata, an atomic multi-row insert and a row
//! count. Rows reach it already grouped into [`InsertPlan`]s, one per distinct
//! field set.

pub mod postgres;

use async_trait::async_trait;
use std::fmt;

use crate::error::Result;
use crate::record::{BookField, ColumnValue, DestinationRecord};

pub use postgres::PostgresDestination;

/// Quotes an identifier for PostgreSQL, doubling embedded quotes.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub name: String,
}

impl TableRef {
    /// Creates a table reference.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Quoted `"schema"."name"` form for SQL text.
    #[must_use]
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Rows sharing one field set, ready for a single column list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertPlan {
    /// Columns written, in column order.
    pub columns: Vec<BookField>,
    /// One value per column for each row.
    pub rows: Vec<Vec<ColumnValue>>,
    /// Column carrying the duplicate-skip clause, if it is written at all.
    pub conflict_column: Option<BookField>,
}

impl InsertPlan {
    /// Groups rows by their exact field set, in order of first appearance.
    ///
    /// Rows with no fields left are dropped. The conflict column only applies
    /// to a group that actually writes it.
    #[must_use]
    pub fn group(rows: Vec<DestinationRecord>, conflict_column: Option<BookField>) -> Vec<Self> {
        let mut plans: Vec<Self> = Vec::new();

        for row in rows.into_iter().filter(|r| !r.is_empty()) {
            let columns = row.fields();
            let values = row.into_values();
            match plans.iter_mut().find(|p| p.columns == columns) {
                Some(plan) => plan.rows.push(values),
                None => {
                    let conflict_column = conflict_column.filter(|c| columns.contains(c));
                    plans.push(Self {
                        columns,
                        rows: vec![values],
                        conflict_column,
                    });
                }
            }
        }

        plans
    }

    /// Number of rows in the plan.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the plan has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The first row as `(field, value)` pairs, for diagnostics.
    pub fn first_row(&self) -> Option<DestinationRecord> {
        let values = self.rows.first()?;
        let mut row = DestinationRecord::new();
        for (field, value) in self.columns.iter().zip(values) {
            row.set(*field, value.clone());
        }
        Some(row)
    }
}

/// Total rows across plans.
#[must_use]
pub fn total_rows(plans: &[InsertPlan]) -> usize {
    plans.iter().map(InsertPlan::len).sum()
}

/// Trait for migration destinations.
#[async_trait]
pub trait DestinationConnector: Send + Sync {
    /// Returns the destination type name.
    fn destination_type(&self) -> &'static str;

    /// Connects to the destination.
    async fn connect(&mut self) -> Result<()>;

    /// Column names of `table`, or `None` if the table does not exist.
    async fn describe_table(&self, table: &TableRef) -> Result<Option<Vec<String>>>;

    /// Writes every plan in one transaction and returns the rows affected.
    ///
    /// Either all plans are committed or none are.
    async fn write_batch(&self, table: &TableRef, plans: &[InsertPlan]) -> Result<u64>;

    /// Current number of rows in `table`.
    async fn count_rows(&self, table: &TableRef) -> Result<u64>;

    /// Releases the connection.
    async fn close(&mut self) -> Result<()>;
}
