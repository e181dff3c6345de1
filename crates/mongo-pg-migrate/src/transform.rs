//! Document-to-row mapping.
//!
//! A row is built in two passes. The base pass reads the conventional field
//! names and falls back to each column's default, so every row is fully
//! populated. The override pass then lets alternate (camelCase) field names
//! replace whatever the base pass produced.

use std::collections::BTreeMap;

use crate::error::TransformError;
use crate::record::{BookField, ColumnValue, DestinationRecord, SourceRecord, SourceValue};

/// Separator used when a list becomes a single text column.
pub const LIST_SEPARATOR: &str = ", ";

/// Conventional source field names. `book_id` is not listed: it comes from the
/// document identifier.
const BASE_FIELDS: [(BookField, &str); 6] = [
    (BookField::BookName, "title"),
    (BookField::BookAuthors, "authors"),
    (BookField::IsbnNumber, "isbn"),
    (BookField::BookCategory, "category"),
    (BookField::EditionNumber, "edition"),
    (BookField::YearOfPublication, "year"),
];

/// Alternate source field names recognised out of the box.
#[must_use]
pub fn default_field_overrides() -> BTreeMap<String, BookField> {
    [
        ("bookId", BookField::BookId),
        ("bookName", BookField::BookName),
        ("bookAuthors", BookField::BookAuthors),
        ("isbnNumber", BookField::IsbnNumber),
        ("bookCategory", BookField::BookCategory),
        ("editionNumber", BookField::EditionNumber),
        ("yearOfPublication", BookField::YearOfPublication),
    ]
    .into_iter()
    .map(|(name, field)| (name.to_string(), field))
    .collect()
}

/// A record that could not be transformed.
#[derive(Debug, Clone)]
pub struct TransformFailure {
    /// Identifier of the offending document.
    pub source_id: String,
    /// Why it was rejected.
    pub error: TransformError,
}

/// Output of transforming one batch.
#[derive(Debug, Default)]
pub struct TransformedBatch {
    /// Rows that were produced, in source order.
    pub rows: Vec<DestinationRecord>,
    /// Documents that were skipped.
    pub failures: Vec<TransformFailure>,
}

/// Maps source documents onto destination rows.
#[derive(Debug, Clone)]
pub struct Transformer {
    overrides: BTreeMap<String, BookField>,
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new(default_field_overrides())
    }
}

impl Transformer {
    /// Creates a transformer with the given alternate-name table.
    #[must_use]
    pub fn new(overrides: BTreeMap<String, BookField>) -> Self {
        Self { overrides }
    }

    /// Transforms one document. Never mutates the input.
    ///
    /// # Errors
    ///
    /// Returns a [`TransformError`] if a present value cannot be converted to
    /// its column type.
    pub fn transform(&self, record: &SourceRecord) -> Result<DestinationRecord, TransformError> {
        let mut row = DestinationRecord::new();

        row.set(
            BookField::BookId,
            ColumnValue::Text(record.id.clone().unwrap_or_default()),
        );

        for (field, name) in BASE_FIELDS {
            let value = match record.get(name) {
                Some(value) => convert(field, value)?,
                None => field.default_value(),
            };
            row.set(field, value);
        }

        for (name, field) in &self.overrides {
            if let Some(value) = record.get(name) {
                row.set(*field, convert(*field, value)?);
            }
        }

        Ok(row)
    }

    /// Transforms a batch, collecting failures instead of stopping at them.
    #[must_use]
    pub fn transform_batch(&self, records: &[SourceRecord]) -> TransformedBatch {
        let mut out = TransformedBatch {
            rows: Vec::with_capacity(records.len()),
            failures: Vec::new(),
        };

        for record in records {
            match self.transform(record) {
                Ok(row) => out.rows.push(row),
                Err(error) => out.failures.push(TransformFailure {
                    source_id: record.display_id().to_string(),
                    error,
                }),
            }
        }

        out
    }
}

fn convert(field: BookField, value: &SourceValue) -> Result<ColumnValue, TransformError> {
    if field.is_integer() {
        to_integer(field, value).map(ColumnValue::Integer)
    } else {
        to_text(field, value).map(ColumnValue::Text)
    }
}

fn to_text(field: BookField, value: &SourceValue) -> Result<String, TransformError> {
    match value {
        SourceValue::Text(s) => Ok(s.clone()),
        SourceValue::Integer(i) => Ok(i.to_string()),
        SourceValue::Float(x) => Ok(x.to_string()),
        SourceValue::Bool(b) => Ok(b.to_string()),
        SourceValue::List(items) => join_list(field, items),
        SourceValue::Null => Ok(String::new()),
        SourceValue::Document(_) => Err(TransformError::UnsupportedValue {
            field,
            found: value.kind(),
        }),
    }
}

fn join_list(field: BookField, items: &[SourceValue]) -> Result<String, TransformError> {
    let mut parts = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match item {
            SourceValue::Text(s) => parts.push(s.as_str()),
            _ => return Err(TransformError::NonTextListElement { field, index }),
        }
    }
    Ok(parts.join(LIST_SEPARATOR))
}

fn to_integer(field: BookField, value: &SourceValue) -> Result<i64, TransformError> {
    match value {
        SourceValue::Integer(i) => Ok(*i),
        // i64::MAX as f64 rounds up, hence the strict upper bound
        SourceValue::Float(x)
            if x.is_finite()
                && x.fract() == 0.0
                && *x >= i64::MIN as f64
                && *x < i64::MAX as f64 =>
        {
            Ok(*x as i64)
        }
        SourceValue::Float(x) => Err(TransformError::NotAnInteger {
            field,
            value: x.to_string(),
        }),
        SourceValue::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| TransformError::NotAnInteger {
                field,
                value: s.clone(),
            }),
        SourceValue::Null => match field.default_value() {
            ColumnValue::Integer(i) => Ok(i),
            ColumnValue::Text(_) => Ok(0),
        },
        SourceValue::Bool(_) | SourceValue::List(_) | SourceValue::Document(_) => {
            Err(TransformError::UnsupportedValue {
                field,
                found: value.kind(),
            })
        }
    }
}

#[cfg(test)]
#[path = "transform_tests.rs"]
mod tests;
