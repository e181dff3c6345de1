//! MongoDB Atlas Data API connector.
//!
//! Talks to the Data API over REST for deployments that still expose it; the
//! wire-protocol source lives in [`super::mongodb`]. Every page is requested with an
//! explicit `_id` ascending sort so that `skip` addresses the same documents
//! on every call.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::connectors::common::{create_http_client, handle_http_error, validate_url};
use crate::connectors::{Page, SourceConnector};
use crate::error::{Error, Result};
use crate::record::SourceValue;

/// Configuration for a MongoDB Atlas Data API source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataApiConfig {
    /// MongoDB Data API endpoint URL.
    /// Format: https://data.mongodb-api.com/app/<app-id>/endpoint/data/v1
    pub data_api_url: String,
    /// MongoDB Data API key.
    #[serde(default)]
    pub api_key: String,
    /// Cluster (data source) name.
    #[serde(default = "default_data_source")]
    pub data_source: String,
    /// Database name.
    pub database: String,
    /// Collection name.
    pub collection: String,
    /// Field name for document ID (default: "_id").
    #[serde(default = "default_id_field")]
    pub id_field: String,
}

fn default_data_source() -> String {
    "mongodb-atlas".to_string()
}

fn default_id_field() -> String {
    "_id".to_string()
}

/// Request body for MongoDB Data API find operation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FindRequest {
    data_source: String,
    database: String,
    collection: String,
    filter: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    projection: Option<serde_json::Value>,
    sort: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    skip: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u64>,
}

/// Response from MongoDB Data API find operation.
#[derive(Debug, Deserialize)]
struct FindResponse {
    documents: Vec<serde_json::Value>,
}

/// Request for aggregate operation (used for counting).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AggregateRequest {
    data_source: String,
    database: String,
    collection: String,
    pipeline: Vec<serde_json::Value>,
}

/// Response from aggregate operation.
#[derive(Debug, Deserialize)]
struct AggregateResponse {
    documents: Vec<serde_json::Value>,
}

/// MongoDB Atlas Data API connector.
pub struct DataApiConnector {
    config: DataApiConfig,
    client: Client,
}

impl DataApiConnector {
    /// Creates a new MongoDB connector with configured HTTP client.
    pub fn new(config: DataApiConfig) -> Self {
        Self {
            config,
            client: create_http_client(),
        }
    }

    /// Builds the API URL for a specific action.
    fn build_url(&self, action: &str) -> String {
        format!(
            "{}/action/{}",
            self.config.data_api_url.trim_end_matches('/'),
            action
        )
    }

    fn find_request(&self, skip: Option<u64>, limit: u64) -> FindRequest {
        FindRequest {
            data_source: self.config.data_source.clone(),
            database: self.config.database.clone(),
            collection: self.config.collection.clone(),
            filter: serde_json::json!({}),
            projection: None,
            sort: serde_json::json!({ self.config.id_field.as_str(): 1 }),
            skip,
            limit: Some(limit),
        }
    }

    /// Makes a POST request to the MongoDB Data API.
    async fn api_request<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        action: &str,
        body: &T,
    ) -> Result<R> {
        let url = self.build_url(action);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("api-key", &self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::SourceConnection(format!("MongoDB API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            return Err(handle_http_error(status.as_u16(), &body, "MongoDB"));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Extraction(format!("Failed to parse MongoDB response: {}", e)))
    }

}

#[async_trait]
impl SourceConnector for DataApiConnector {
    fn source_type(&self) -> &'static str {
        "mongodb_data_api"
    }

    async fn connect(&mut self) -> Result<()> {
        validate_url(&self.config.data_api_url)?;

        // Cheapest round trip that proves the endpoint, key and collection work
        let mut check = self.find_request(None, 1);
        check.projection = Some(serde_json::json!({ self.config.id_field.as_str(): 1 }));
        let _: FindResponse = self.api_request("find", &check).await?;

        info!(
            "Connected to MongoDB database: {} (collection {})",
            self.config.database, self.config.collection
        );
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let request = AggregateRequest {
            data_source: self.config.data_source.clone(),
            database: self.config.database.clone(),
            collection: self.config.collection.clone(),
            pipeline: vec![serde_json::json!({ "$count": "total" })],
        };

        let response: AggregateResponse = self.api_request("aggregate", &request).await?;

        // $count emits no document at all for an empty collection
        let Some(doc) = response.documents.first() else {
            return Ok(0);
        };
        match SourceValue::from_json(doc.get("total").cloned().unwrap_or_default()) {
            SourceValue::Integer(n) if n >= 0 => Ok(n as u64),
            other => Err(Error::Extraction(format!(
                "Unexpected $count result from MongoDB: {}",
                other
            ))),
        }
    }

    async fn fetch_page(&self, skip: u64, limit: usize) -> Result<Page> {
        let request = self.find_request(Some(skip), limit as u64);
        let response: FindResponse = self.api_request("find", &request).await?;
        debug!(
            skip,
            limit,
            fetched = response.documents.len(),
            "Fetched page from MongoDB"
        );
        Ok(Page::from_documents(
            response.documents,
            skip,
            &self.config.id_field,
        ))
    }

    async fn close(&mut self) -> Result<()> {
        debug!("Closing MongoDB Data API client");
        Ok(())
    }
}

#[cfg(test)]
#[path = "data_api_tests.rs"]
mod tests;
