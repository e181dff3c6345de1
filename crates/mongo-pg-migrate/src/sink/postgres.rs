//! PostgreSQL destination.
//!
//! Uses sqlx with a small pool. Each batch is one transaction holding one or
//! more multi-row `INSERT` statements; a statement never exceeds the protocol's
//! bind parameter limit.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::DestinationConfig;
use crate::error::{Error, Result};
use crate::record::ColumnValue;
use crate::sink::{quote_ident, DestinationConnector, InsertPlan, TableRef};

/// Bind parameters PostgreSQL accepts in a single statement.
pub const MAX_BIND_PARAMS: usize = 65535;

/// PostgreSQL destination connector.
pub struct PostgresDestination {
    config: DestinationConfig,
    pool: Option<PgPool>,
}

impl PostgresDestination {
    /// Creates a destination; nothing is opened until [`connect`](DestinationConnector::connect).
    #[must_use]
    pub fn new(config: DestinationConfig) -> Self {
        Self { config, pool: None }
    }

    fn pool(&self) -> Result<&PgPool> {
        self.pool.as_ref().ok_or_else(|| {
            Error::DestinationConnection("not connected to PostgreSQL".to_string())
        })
    }

    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .username(&self.config.user)
            .password(&self.config.password)
            .database(&self.config.database)
    }
}

/// Rows per statement so that `columns * rows` stays within [`MAX_BIND_PARAMS`].
#[must_use]
pub fn rows_per_statement(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).max(1)
}

/// Builds one multi-row insert for `rows` of `plan`.
///
/// The column list is exactly `plan.columns`; a conflict column adds
/// `ON CONFLICT (...) DO NOTHING`.
pub fn build_insert<'a>(
    table: &TableRef,
    plan: &InsertPlan,
    rows: &'a [Vec<ColumnValue>],
) -> QueryBuilder<'a, Postgres> {
    let columns = plan
        .columns
        .iter()
        .map(|c| quote_ident(c.column_name()))
        .collect::<Vec<_>>()
        .join(", ");

    let mut qb = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        table.qualified(),
        columns
    ));

    qb.push_values(rows, |mut row_builder, row| {
        for value in row {
            match value {
                ColumnValue::Text(s) => {
                    row_builder.push_bind(s.as_str());
                }
                ColumnValue::Integer(i) => {
                    row_builder.push_bind(*i);
                }
            }
        }
    });

    if let Some(conflict) = plan.conflict_column {
        qb.push(format!(
            " ON CONFLICT ({}) DO NOTHING",
            quote_ident(conflict.column_name())
        ));
    }

    qb
}

fn check_plan(plan: &InsertPlan) -> Result<()> {
    if plan.columns.is_empty() {
        return Err(Error::Insert("insert plan has no columns".to_string()));
    }
    if let Some(bad) = plan.rows.iter().find(|r| r.len() != plan.columns.len()) {
        return Err(Error::Insert(format!(
            "row has {} values for {} columns",
            bad.len(),
            plan.columns.len()
        )));
    }
    Ok(())
}

#[async_trait]
impl DestinationConnector for PostgresDestination {
    fn destination_type(&self) -> &'static str {
        "postgres"
    }

    async fn connect(&mut self) -> Result<()> {
        let pool = PgPoolOptions::new()
            .max_connections(self.config.max_connections)
            .acquire_timeout(Duration::from_secs(self.config.connect_timeout_secs))
            .connect_with(self.connect_options())
            .await
            .map_err(|e| {
                Error::DestinationConnection(format!(
                    "Failed to connect to PostgreSQL at {}:{}/{}: {}",
                    self.config.host, self.config.port, self.config.database, e
                ))
            })?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| Error::DestinationConnection(format!("PostgreSQL ping failed: {}", e)))?;

        info!(
            "Connected to PostgreSQL database: {} on {}:{}",
            self.config.database, self.config.host, self.config.port
        );
        self.pool = Some(pool);
        Ok(())
    }

    async fn describe_table(&self, table: &TableRef) -> Result<Option<Vec<String>>> {
        let pool = self.pool()?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = $1 AND table_name = $2)",
        )
        .bind(&table.schema)
        .bind(&table.name)
        .fetch_one(pool)
        .await?;

        if !exists {
            return Ok(None);
        }

        let columns: Vec<String> = sqlx::query_scalar(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
        )
        .bind(&table.schema)
        .bind(&table.name)
        .fetch_all(pool)
        .await?;

        debug!(table = %table, columns = ?columns, "Discovered destination columns");
        Ok(Some(columns))
    }

    async fn write_batch(&self, table: &TableRef, plans: &[InsertPlan]) -> Result<u64> {
        for plan in plans {
            check_plan(plan)?;
        }

        let pool = self.pool()?;
        let mut tx = pool.begin().await?;
        let mut affected = 0u64;

        for plan in plans {
            for chunk in plan.rows.chunks(rows_per_statement(plan.columns.len())) {
                let mut qb = build_insert(table, plan, chunk);
                match qb.build().execute(&mut *tx).await {
                    Ok(result) => affected += result.rows_affected(),
                    Err(e) => {
                        if let Err(rollback_err) = tx.rollback().await {
                            warn!("Rollback failed: {}", rollback_err);
                        }
                        return Err(e.into());
                    }
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| Error::Commit(format!("batch commit on {} failed: {}", table, e)))?;
        Ok(affected)
    }

    async fn count_rows(&self, table: &TableRef) -> Result<u64> {
        let pool = self.pool()?;
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table.qualified()))
            .fetch_one(pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            debug!("PostgreSQL pool closed");
        }
        Ok(())
    }
}
