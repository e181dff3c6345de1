//! Configuration types for mongo-pg-migrate.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::record::BookField;
use crate::retry::RetryConfig;
use crate::transform::default_field_overrides;

/// Main migration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Source collection configuration.
    pub source: SourceConfig,
    /// Destination PostgreSQL configuration.
    pub destination: DestinationConfig,
    /// Migration options.
    #[serde(default)]
    pub options: MigrationOptions,
}

/// Source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SourceConfig {
    /// A MongoDB deployment reached with a connection string.
    #[serde(rename = "mongodb")]
    MongoDB(crate::connectors::mongodb::MongoDBConfig),
    /// MongoDB Atlas via the Data API.
    #[serde(rename = "mongodb_data_api")]
    DataApi(crate::connectors::data_api::DataApiConfig),
    /// A `mongoexport --jsonArray` dump on disk.
    #[serde(rename = "json_file")]
    JsonFile(crate::connectors::json_file::JsonFileConfig),
}

impl SourceConfig {
    /// Human-readable name of the source collection, for logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::MongoDB(cfg) => format!("mongodb:{}.{}", cfg.database, cfg.collection),
            Self::DataApi(cfg) => {
                format!("mongodb_data_api:{}.{}", cfg.database, cfg.collection)
            }
            Self::JsonFile(cfg) => format!("json_file:{}", cfg.path.display()),
        }
    }
}

/// Destination PostgreSQL configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Server host name.
    pub host: String,
    /// Server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login role.
    pub user: String,
    /// Password (prefer `PGPASSWORD` over putting it in the file).
    #[serde(default)]
    pub password: String,
    /// Database name.
    pub database: String,
    /// Schema holding the table.
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Table receiving the rows.
    pub table: String,
    /// Connection pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Seconds to wait when establishing a connection.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Migration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationOptions {
    /// Documents per batch; also the commit unit.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Column used for duplicate-skip (`null` disables it).
    #[serde(default = "default_conflict_column")]
    pub conflict_column: Option<BookField>,
    /// Alternate source field name -> destination field.
    #[serde(default = "default_field_overrides")]
    pub field_overrides: BTreeMap<String, BookField>,
    /// Time budget for one page fetch or one batch write.
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,
    /// Retries for transient failures (not counting the first attempt).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Transform and filter only; never write.
    #[serde(default)]
    pub dry_run: bool,
    /// Draw a progress bar on stderr.
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            conflict_column: default_conflict_column(),
            field_overrides: default_field_overrides(),
            batch_timeout_secs: default_batch_timeout_secs(),
            max_retries: default_max_retries(),
            dry_run: false,
            show_progress: true,
        }
    }
}

impl MigrationOptions {
    /// Per-batch time budget.
    #[must_use]
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    /// Retry policy for fetches and batch writes.
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            ..RetryConfig::for_transient_errors()
        }
    }
}

fn default_port() -> u16 {
    5432
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_max_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_batch_size() -> usize {
    1000
}

fn default_conflict_column() -> Option<BookField> {
    Some(BookField::BookId)
}

fn default_batch_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl MigrationConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match &self.source {
            SourceConfig::MongoDB(cfg) => {
                require("source.uri", &cfg.uri)?;
                crate::connectors::mongodb::validate_uri(&cfg.uri)?;
                require("source.database", &cfg.database)?;
                require("source.collection", &cfg.collection)?;
            }
            SourceConfig::DataApi(cfg) => {
                require("source.data_api_url", &cfg.data_api_url)?;
                require("source.database", &cfg.database)?;
                require("source.collection", &cfg.collection)?;
            }
            SourceConfig::JsonFile(cfg) => {
                if cfg.path.as_os_str().is_empty() {
                    return Err(Error::Config("source.path cannot be empty".to_string()));
                }
            }
        }

        let dest = &self.destination;
        require("destination.host", &dest.host)?;
        require("destination.user", &dest.user)?;
        require("destination.database", &dest.database)?;
        require("destination.schema", &dest.schema)?;
        require("destination.table", &dest.table)?;
        if dest.port == 0 {
            return Err(Error::Config("destination.port must be greater than 0".to_string()));
        }
        if dest.max_connections == 0 {
            return Err(Error::Config(
                "destination.max_connections must be greater than 0".to_string(),
            ));
        }

        let opts = &self.options;
        if opts.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than 0".to_string()));
        }
        if opts.batch_timeout_secs == 0 {
            return Err(Error::Config(
                "batch_timeout_secs must be greater than 0".to_string(),
            ));
        }

        let mut targets: HashMap<BookField, &str> = HashMap::new();
        for (name, field) in &opts.field_overrides {
            if name.trim().is_empty() {
                return Err(Error::Config(
                    "field_overrides contains an empty source field name".to_string(),
                ));
            }
            if let Some(previous) = targets.insert(*field, name) {
                return Err(Error::Config(format!(
                    "field_overrides maps both '{previous}' and '{name}' to '{field}'"
                )));
            }
        }

        Ok(())
    }
}

fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Config(format!("{name} cannot be empty")));
    }
    Ok(())
}
