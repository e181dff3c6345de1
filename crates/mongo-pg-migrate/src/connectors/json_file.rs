//! JSON dump connector.
//!
//! Reads the output of `mongoexport`, either `--jsonArray` or the default one
//! document per line. The whole file is loaded on connect and paged
//! positionally, which is stable because the data never changes afterwards.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

use crate::connectors::common::MAX_FILE_SIZE;
use crate::connectors::{Page, SourceConnector};
use crate::error::{Error, Result};

/// Configuration for a JSON dump source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonFileConfig {
    /// Path to the JSON file.
    pub path: PathBuf,
    /// Dotted path to the documents array (e.g., "data.books" or "" for root).
    #[serde(default)]
    pub array_path: String,
    /// Field name for document ID.
    #[serde(default = "default_id_field")]
    pub id_field: String,
}

fn default_id_field() -> String {
    "_id".to_string()
}

/// JSON dump connector.
pub struct JsonFileConnector {
    config: JsonFileConfig,
    data: Vec<serde_json::Value>,
}

impl JsonFileConnector {
    /// Creates a new JSON file connector.
    #[must_use]
    pub fn new(config: JsonFileConfig) -> Self {
        Self {
            config,
            data: Vec::new(),
        }
    }

    /// Extracts the documents array from JSON using the configured path.
    fn extract_array(&self, root: serde_json::Value) -> Result<Vec<serde_json::Value>> {
        if self.config.array_path.is_empty() {
            return match root {
                serde_json::Value::Array(arr) => Ok(arr),
                // A single-document export
                obj @ serde_json::Value::Object(_) => Ok(vec![obj]),
                _ => Err(Error::Extraction(
                    "Root JSON is not an array. Specify array_path.".to_string(),
                )),
            };
        }

        let mut current = root;
        for part in self.config.array_path.split('.') {
            current = current
                .get(part)
                .cloned()
                .ok_or_else(|| Error::Extraction(format!("Path '{}' not found", part)))?;
        }
        match current {
            serde_json::Value::Array(arr) => Ok(arr),
            _ => Err(Error::Extraction(format!(
                "Path '{}' is not an array",
                self.config.array_path
            ))),
        }
    }

    /// Parses newline-delimited documents.
    fn parse_lines(content: &str) -> Result<Vec<serde_json::Value>> {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(no, line)| {
                serde_json::from_str(line).map_err(|e| {
                    Error::Extraction(format!("Invalid JSON on line {}: {}", no + 1, e))
                })
            })
            .collect()
    }
}

#[async_trait]
impl SourceConnector for JsonFileConnector {
    fn source_type(&self) -> &'static str {
        "json_file"
    }

    async fn connect(&mut self) -> Result<()> {
        let path = &self.config.path;
        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            Error::SourceConnection(format!("Failed to open '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_FILE_SIZE {
            return Err(Error::SourceConnection(format!(
                "'{}' is {} bytes, above the {} byte import limit",
                path.display(),
                metadata.len(),
                MAX_FILE_SIZE
            )));
        }

        let content = tokio::fs::read_to_string(path).await?;
        self.data = match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(root) => self.extract_array(root)?,
            Err(_) if self.config.array_path.is_empty() => Self::parse_lines(&content)?,
            Err(e) => return Err(Error::Extraction(format!("Failed to parse JSON: {}", e))),
        };

        info!(
            "Loaded {} documents from {}",
            self.data.len(),
            path.display()
        );
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    async fn fetch_page(&self, skip: u64, limit: usize) -> Result<Page> {
        let start = usize::try_from(skip).unwrap_or(usize::MAX).min(self.data.len());
        let end = start.saturating_add(limit).min(self.data.len());

        Ok(Page::from_documents(
            self.data[start..end].iter().cloned(),
            start as u64,
            &self.config.id_field,
        ))
    }

    async fn close(&mut self) -> Result<()> {
        self.data.clear();
        Ok(())
    }
}

#[cfg(test)]
#[path = "json_file_tests.rs"]
mod tests;
