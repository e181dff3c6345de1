//! Destination column discovery results and the row filter built on them.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::record::{BookField, DestinationRecord};

/// Columns that exist in the destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSet {
    table: String,
    columns: BTreeSet<String>,
}

impl ColumnSet {
    /// Builds a column set from discovered column names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaDiscovery`] if no columns were found, or if none
    /// of them is a column this tool can populate.
    pub fn new<I, S>(table: impl Into<String>, columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let table = table.into();
        let columns: BTreeSet<String> = columns.into_iter().map(Into::into).collect();

        if columns.is_empty() {
            return Err(Error::SchemaDiscovery(format!(
                "no columns discovered for table '{table}'"
            )));
        }

        let set = Self { table, columns };
        if set.writable_fields().is_empty() {
            return Err(Error::SchemaDiscovery(format!(
                "table '{}' has none of the book columns ({})",
                set.table,
                BookField::ALL.map(BookField::column_name).join(", ")
            )));
        }

        Ok(set)
    }

    /// Table the columns belong to.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns true if the table has a column named `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    /// All discovered column names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    /// Book fields that have a matching column, in column order.
    #[must_use]
    pub fn writable_fields(&self) -> Vec<BookField> {
        BookField::ALL
            .into_iter()
            .filter(|f| self.contains(f.column_name()))
            .collect()
    }

    /// Keeps only the fields of `row` that exist in the table.
    #[must_use]
    pub fn filter(&self, mut row: DestinationRecord) -> DestinationRecord {
        row.retain(|field| self.contains(field.column_name()));
        row
    }
}
