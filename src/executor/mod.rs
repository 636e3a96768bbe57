//! Running generated SQL and reloading schema graphs afterwards

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::graph_catalog::{DatabaseInfo, GraphSchemaError};
use crate::pipeline::statement::{self, SchemaChange};

pub mod clickhouse;

pub use self::clickhouse::{ClickHouseExecutor, ClickHouseSchemaRefresher};

/// Rows as JSON objects, or a single `{operation, affected_rows, status}` object
pub type QueryRows = Vec<Value>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutionError {
    #[error("{0}")]
    Database(String),
    #[error("Malformed row returned by database: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RefreshError {
    #[error("Failed to introspect database '{database}': {message}")]
    Introspection { database: String, message: String },
    #[error("Failed to rebuild schema graph: {0}")]
    Build(String),
    #[error(transparent)]
    Graph(#[from] GraphSchemaError),
}

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, database: &DatabaseInfo, sql: &str) -> Result<QueryRows, ExecutionError>;

    /// Schema modification `sql` performs, judged by its leading keywords
    fn schema_change(&self, sql: &str) -> Option<SchemaChange> {
        statement::schema_change(sql)
    }
}

#[async_trait]
pub trait SchemaRefresher: Send + Sync {
    /// Discard the graph stored for `graph_id` and reload it from the live database.
    /// Returns a human-readable summary.
    async fn refresh(&self, graph_id: &str, database: &DatabaseInfo) -> Result<String, RefreshError>;
}
