//! Source connectors for document stores.

pub mod common;
pub mod data_api;
pub mod json_file;
pub mod mongodb;

use async_trait::async_trait;

use crate::error::Result;
use crate::record::SourceRecord;

/// A document that was fetched but could not be read as a record.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedDocument {
    /// Position of the document in the collection's stable order.
    pub position: u64,
    /// Why it was rejected.
    pub reason: String,
}

/// One page of a source collection.
///
/// `records` and `rejected` together account for every document the source
/// returned, so [`Page::len`] is what the next `skip` must advance by.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Readable documents in source order.
    pub records: Vec<SourceRecord>,
    /// Documents skipped as record-scoped failures.
    pub rejected: Vec<RejectedDocument>,
}

impl Page {
    /// Builds a page of raw documents starting at `first_position`.
    ///
    /// Anything that is not an object is rejected rather than failing the page.
    pub fn from_documents<I>(documents: I, first_position: u64, id_field: &str) -> Self
    where
        I: IntoIterator<Item = serde_json::Value>,
    {
        let mut page = Self::default();
        for (offset, doc) in documents.into_iter().enumerate() {
            let position = first_position + offset as u64;
            let kind = json_kind(&doc);
            match SourceRecord::from_document(doc, id_field) {
                Some(record) => page.records.push(record),
                None => page.rejected.push(RejectedDocument {
                    position,
                    reason: format!("document is a JSON {kind}, not an object"),
                }),
            }
        }
        page
    }

    /// Documents fetched, readable or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len() + self.rejected.len()
    }

    /// Returns true if the source returned nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Trait for source collection connectors.
///
/// Pages are addressed by `skip`/`limit`. Implementations must return
/// documents in a stable order across calls, otherwise skip-based paging can
/// drop or repeat documents.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Get the source type name.
    fn source_type(&self) -> &'static str;

    /// Connect to the source and check that it is reachable.
    async fn connect(&mut self) -> Result<()>;

    /// Count the documents in the collection (point-in-time snapshot).
    async fn count(&self) -> Result<u64>;

    /// Fetch up to `limit` documents after skipping the first `skip`.
    async fn fetch_page(&self, skip: u64, limit: usize) -> Result<Page>;

    /// Close the connection and cleanup resources.
    async fn close(&mut self) -> Result<()>;
}

/// Create a source connector from configuration.
pub fn create_source(config: &crate::config::SourceConfig) -> Result<Box<dyn SourceConnector>> {
    match config {
        crate::config::SourceConfig::MongoDB(cfg) => {
            Ok(Box::new(mongodb::MongoDBConnector::new(cfg.clone())))
        }
        crate::config::SourceConfig::DataApi(cfg) => {
            Ok(Box::new(data_api::DataApiConnector::new(cfg.clone())))
        }
        crate::config::SourceConfig::JsonFile(cfg) => {
            Ok(Box::new(json_file::JsonFileConnector::new(cfg.clone())))
        }
    }
}
