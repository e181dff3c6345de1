//! In-memory source and destination used to drive the pipeline in tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use mongo_pg_migrate::config::{DestinationConfig, MigrationOptions};
use mongo_pg_migrate::connectors::json_file::JsonFileConfig;
use mongo_pg_migrate::{
    BookField, ColumnValue, DestinationConnector, DestinationRecord, Error, InsertPlan,
    MigrationConfig, Page, Result, SourceConfig, SourceConnector, TableRef,
};

pub const ALL_COLUMNS: [&str; 7] = [
    "book_id",
    "book_name",
    "book_authors",
    "isbn_number",
    "book_category",
    "edition_number",
    "year_of_publication",
];

/// Config whose connectors are replaced by fakes.
pub fn test_config(batch_size: usize) -> MigrationConfig {
    MigrationConfig {
        source: SourceConfig::JsonFile(JsonFileConfig {
            path: PathBuf::from("books.json"),
            array_path: String::new(),
            id_field: "_id".to_string(),
        }),
        destination: DestinationConfig {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "library".to_string(),
            schema: "public".to_string(),
            table: "books".to_string(),
            max_connections: 1,
            connect_timeout_secs: 1,
        },
        options: MigrationOptions {
            batch_size,
            max_retries: 0,
            show_progress: false,
            ..MigrationOptions::default()
        },
    }
}

/// `count` well-formed book documents with ids `b0`, `b1`, ...
pub fn books(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            serde_json::json!({
                "_id": format!("b{i}"),
                "title": format!("Book {i}"),
                "authors": ["A", "B"],
                "isbn": format!("isbn-{i}"),
                "category": "fiction",
                "edition": 1,
                "year": 2000 + i,
            })
        })
        .collect()
}

#[derive(Default)]
pub struct SourceState {
    pub closed: AtomicBool,
    pub connected: AtomicBool,
}

pub struct MemorySource {
    docs: Vec<Value>,
    unreachable: bool,
    pub state: Arc<SourceState>,
}

impl MemorySource {
    pub fn new(docs: Vec<Value>) -> Self {
        Self {
            docs,
            unreachable: false,
            state: Arc::default(),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::new(vec![])
        }
    }
}

#[async_trait]
impl SourceConnector for MemorySource {
    fn source_type(&self) -> &'static str {
        "memory"
    }

    async fn connect(&mut self) -> Result<()> {
        if self.unreachable {
            return Err(Error::SourceConnection("connection refused".to_string()));
        }
        self.state.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.docs.len() as u64)
    }

    async fn fetch_page(&self, skip: u64, limit: usize) -> Result<Page> {
        let start = (skip as usize).min(self.docs.len());
        let end = (start + limit).min(self.docs.len());
        Ok(Page::from_documents(
            self.docs[start..end].iter().cloned(),
            start as u64,
            "_id",
        ))
    }

    async fn close(&mut self) -> Result<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct TableState {
    pub rows: Vec<DestinationRecord>,
    pub write_calls: usize,
    pub written_columns: Vec<Vec<BookField>>,
    pub conflict_columns: Vec<Option<BookField>>,
    pub closed: bool,
}

impl TableState {
    pub fn ids(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|r| match r.get(BookField::BookId) {
                Some(ColumnValue::Text(id)) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }
}

/// A single table held in memory with real duplicate-skip and rollback.
pub struct MemoryDestination {
    columns: Option<Vec<String>>,
    fail_calls: HashSet<usize>,
    lost_ack_calls: HashSet<usize>,
    pub state: Arc<Mutex<TableState>>,
}

impl MemoryDestination {
    pub fn with_columns(columns: &[&str]) -> Self {
        Self {
            columns: Some(columns.iter().map(|c| (*c).to_string()).collect()),
            fail_calls: HashSet::new(),
            lost_ack_calls: HashSet::new(),
            state: Arc::default(),
        }
    }

    pub fn without_table() -> Self {
        Self {
            columns: None,
            ..Self::with_columns(&[])
        }
    }

    /// Fail the n-th write (1-based).
    pub fn failing_on(mut self, call: usize) -> Self {
        self.fail_calls.insert(call);
        self
    }

    /// Commit the n-th write (1-based) but report a dropped connection.
    pub fn losing_ack_on(mut self, call: usize) -> Self {
        self.lost_ack_calls.insert(call);
        self
    }

    /// Another handle on the same table.
    pub fn sharing(&self) -> Self {
        Self {
            columns: self.columns.clone(),
            fail_calls: HashSet::new(),
            lost_ack_calls: HashSet::new(),
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl DestinationConnector for MemoryDestination {
    fn destination_type(&self) -> &'static str {
        "memory"
    }

    async fn connect(&mut self) -> Result<()> {
        self.state.lock().unwrap().closed = false;
        Ok(())
    }

    async fn describe_table(&self, _table: &TableRef) -> Result<Option<Vec<String>>> {
        Ok(self.columns.clone())
    }

    async fn write_batch(&self, _table: &TableRef, plans: &[InsertPlan]) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.write_calls += 1;
        if self.fail_calls.contains(&state.write_calls) {
            return Err(Error::Insert(
                "null value in column violates not-null constraint".to_string(),
            ));
        }

        let mut staged: Vec<DestinationRecord> = Vec::new();
        for plan in plans {
            state.written_columns.push(plan.columns.clone());
            state.conflict_columns.push(plan.conflict_column);
            for values in &plan.rows {
                let mut row = DestinationRecord::new();
                for (field, value) in plan.columns.iter().zip(values) {
                    row.set(*field, value.clone());
                }
                let duplicate = plan.conflict_column.is_some_and(|key| {
                    state
                        .rows
                        .iter()
                        .chain(staged.iter())
                        .any(|existing| existing.get(key) == row.get(key))
                });
                if !duplicate {
                    staged.push(row);
                }
            }
        }

        let inserted = staged.len() as u64;
        state.rows.extend(staged);
        if self.lost_ack_calls.contains(&state.write_calls) {
            return Err(Error::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionReset,
            )));
        }
        Ok(inserted)
    }

    async fn count_rows(&self, _table: &TableRef) -> Result<u64> {
        Ok(self.state.lock().unwrap().rows.len() as u64)
    }

    async fn close(&mut self) -> Result<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}
