//! ClickHouse-backed executor and schema refresher

use std::sync::Arc;

use async_trait::async_trait;
use clickhouse::Client;
use serde_json::{json, Value};
use tokio::io::AsyncBufReadExt;

use super::{ExecutionError, QueryRows, RefreshError, SchemaRefresher, SqlExecutor};
use crate::graph_catalog::{DatabaseInfo, SchemaDiscovery, SchemaGraphStore};
use crate::llm::EmbeddingProvider;
use crate::pipeline::statement::leading_keyword;

/// Statements whose output is a result set
const ROW_RETURNING: [&str; 7] = ["SELECT", "WITH", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "EXISTS"];

/// Point the shared client at the database a graph was loaded from
fn client_for(base: &Client, database: &DatabaseInfo) -> Client {
    let client = base.clone().with_database(database.name.clone());
    match &database.url {
        Some(url) => client.with_url(url.clone()),
        None => client,
    }
}

pub struct ClickHouseExecutor {
    client: Client,
}

impl ClickHouseExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn fetch_rows(&self, client: Client, sql: &str) -> Result<QueryRows, ExecutionError> {
        let mut lines = client
            .query(sql)
            .fetch_bytes("JSONEachRow")
            .map_err(|e| {
                log::error!("ClickHouse query failed. SQL was:\n{}\nError: {}", sql, e);
                ExecutionError::Database(e.to_string())
            })?
            .lines();

        let mut rows: Vec<Value> = vec![];
        while let Some(line) = lines.next_line().await.map_err(|e| {
            log::error!("ClickHouse query failed. SQL was:\n{}\nError: {}", sql, e);
            ExecutionError::Database(e.to_string())
        })? {
            if line.trim().is_empty() {
                continue;
            }
            let value: Value =
                serde_json::from_str(&line).map_err(|e| ExecutionError::Decode(e.to_string()))?;
            rows.push(value);
        }
        Ok(rows)
    }
}

#[async_trait]
impl SqlExecutor for ClickHouseExecutor {
    async fn execute(&self, database: &DatabaseInfo, sql: &str) -> Result<QueryRows, ExecutionError> {
        let client = client_for(&self.client, database);
        let operation = leading_keyword(sql).unwrap_or_else(|| "UNKNOWN".to_string());
        log::debug!("Executing on '{}': {}", database.name, sql);

        if ROW_RETURNING.contains(&operation.as_str()) {
            let rows = self.fetch_rows(client, sql).await?;
            log::info!("Query on '{}' returned {} rows", database.name, rows.len());
            return Ok(rows);
        }

        client.query(sql).execute().await.map_err(|e| {
            log::error!("ClickHouse statement failed. SQL was:\n{}\nError: {}", sql, e);
            ExecutionError::Database(e.to_string())
        })?;
        // ClickHouse does not report affected rows for statements over HTTP
        Ok(vec![json!({
            "operation": operation,
            "affected_rows": null,
            "status": "success",
        })])
    }
}

/// Reloads a graph from the ClickHouse system catalog
pub struct ClickHouseSchemaRefresher {
    client: Client,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn SchemaGraphStore>,
}

impl ClickHouseSchemaRefresher {
    pub fn new(
        client: Client,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn SchemaGraphStore>,
    ) -> Self {
        Self {
            client,
            embedder,
            store,
        }
    }
}

#[async_trait]
impl SchemaRefresher for ClickHouseSchemaRefresher {
    async fn refresh(&self, graph_id: &str, database: &DatabaseInfo) -> Result<String, RefreshError> {
        log::info!("Refreshing schema graph '{}' from database '{}'", graph_id, database.name);
        if self.store.delete_graph(graph_id).await {
            log::debug!("Discarded previous schema graph '{}'", graph_id);
        }

        let client = client_for(&self.client, database);
        let tables = SchemaDiscovery::introspect(&client, &database.name)
            .await
            .map_err(|e| RefreshError::Introspection {
                database: database.name.clone(),
                message: format!("{:#}", e),
            })?;

        let description = if database.description.trim().is_empty()
            || SchemaDiscovery::is_generated_description(&database.name, &database.description)
        {
            SchemaDiscovery::describe_database(&database.name, &tables)
        } else {
            database.description.clone()
        };
        let info = DatabaseInfo {
            name: database.name.clone(),
            description,
            url: database.url.clone(),
        };

        let graph = SchemaDiscovery::build_graph(info, &tables, self.embedder.as_ref())
            .await
            .map_err(|e| RefreshError::Build(format!("{:#}", e)))?;
        let summary = format!(
            "Loaded {} tables and {} columns into graph '{}'",
            graph.table_count(),
            graph.column_count(),
            graph_id
        );
        self.store.replace_graph(graph_id, Arc::new(graph)).await;

        log::info!("{}", summary);
        Ok(summary)
    }
}
