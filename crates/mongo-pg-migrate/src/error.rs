//! Error types for mongo-pg-migrate.
//!
//! Run-level failures use [`Error`]. A failure to map one document into a
//! destination row is a [`TransformError`]: it only ever skips that record.

use thiserror::Error;

use crate::record::BookField;

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while migrating.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The source store could not be reached.
    #[error("Source connection error: {0}")]
    SourceConnection(String),

    /// A page of documents could not be fetched or decoded.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// The destination store could not be reached.
    #[error("Destination connection error: {0}")]
    DestinationConnection(String),

    /// The destination table does not exist.
    #[error("Destination table '{0}' does not exist")]
    TableNotFound(String),

    /// The destination columns could not be discovered or are unusable.
    #[error("Schema discovery error: {0}")]
    SchemaDiscovery(String),

    /// A batch insert failed and was rolled back.
    #[error("Insert error: {0}")]
    Insert(String),

    /// The commit of a batch transaction failed or was not acknowledged.
    ///
    /// The batch may or may not have persisted, so it is never retried.
    #[error("Commit error: {0}")]
    Commit(String),

    /// An operation exceeded its time budget.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The source API asked us to slow down (seconds to wait).
    #[error("Rate limited, retry after {0}s")]
    RateLimit(u64),

    /// Credentials were rejected.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The run was cancelled before it could finish.
    #[error("Migration cancelled")]
    Cancelled,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// MongoDB driver error.
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    /// PostgreSQL driver error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Failure to map one source document onto a destination row.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    /// The value has a shape the destination column cannot hold.
    #[error("field '{field}': unsupported {found} value")]
    UnsupportedValue {
        /// Destination field being populated.
        field: BookField,
        /// Kind of value that was found.
        found: &'static str,
    },

    /// A list meant to be joined holds a non-text element.
    #[error("field '{field}': list element {index} is not a string")]
    NonTextListElement {
        /// Destination field being populated.
        field: BookField,
        /// Position of the offending element.
        index: usize,
    },

    /// A numeric column received something that is not an integer.
    #[error("field '{field}': '{value}' is not an integer")]
    NotAnInteger {
        /// Destination field being populated.
        field: BookField,
        /// Rendering of the rejected value.
        value: String,
    },
}
