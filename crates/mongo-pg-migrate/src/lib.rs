// Migration tool - pedantic lints relaxed for CLI ergonomics
#![allow(clippy::pedantic)]

//! # MongoDB to PostgreSQL Book Migration
//!
//! `mongo-pg-migrate` is a CLI tool and library that copies a collection of
//! book documents into a relational table, one committed batch at a time.
//!
//! Each batch goes through the same steps:
//!
//! 1. **Read** a page of documents, sorted by `_id` so that skip-based paging
//!    neither drops nor repeats documents.
//! 2. **Transform** every document into a book row. Lists are joined with
//!    `", "`, alternate field names override the defaults, and a document
//!    that cannot be read or converted is skipped.
//! 3. **Filter** each row down to the columns the destination table has.
//! 4. **Write** the rows in one transaction with `ON CONFLICT DO NOTHING` on
//!    the identifier column. A failed batch is rolled back and the run moves
//!    on.
//!
//! After the last batch the destination row count is compared with the
//! source count and any shortfall is reported as a warning.
//!
//! ## Supported Sources
//!
//! | Source | Notes |
//! |--------|-------|
//! | MongoDB | `mongodb://` or `mongodb+srv://` connection string, official driver |
//! | MongoDB Atlas Data API | REST, Extended JSON decoded (`type: mongodb_data_api`) |
//! | JSON file | `mongoexport` output, array or one document per line |
//!
//! ## Configuration Example
//!
//! ```yaml
//! source:
//!   type: mongodb
//!   uri: mongodb://localhost:27017
//!   database: library
//!   collection: books
//!
//! destination:
//!   host: localhost
//!   user: postgres
//!   database: library
//!   table: books
//!
//! options:
//!   batch_size: 1000
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod connectors;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod reader;
pub mod record;
pub mod retry;
pub mod schema;
pub mod sink;
pub mod transform;
pub mod writer;

pub use config::{DestinationConfig, MigrationConfig, MigrationOptions, SourceConfig};
pub use connectors::{create_source, Page, RejectedDocument, SourceConnector};
pub use error::{Error, Result, TransformError};
pub use pipeline::{
    MigrationCounters, MigrationReport, MigrationState, Pipeline, PreflightReport, Reconciliation,
};
pub use reader::{Batch, BatchReader};
pub use record::{BookField, ColumnValue, DestinationRecord, SourceRecord, SourceValue};
pub use schema::ColumnSet;
pub use sink::{DestinationConnector, InsertPlan, PostgresDestination, TableRef};
pub use transform::Transformer;
pub use writer::{BatchWriter, WriteOutcome};
