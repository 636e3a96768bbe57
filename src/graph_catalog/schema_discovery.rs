//! Schema discovery module for introspecting ClickHouse databases
//!
//! Reads table and column metadata from the system catalog, infers foreign keys
//! from `<entity>_id` naming (ClickHouse has no FK constraints), and turns the
//! result into an embedded schema graph.

use anyhow::Context;
use clickhouse::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::memory_graph::{InMemorySchemaGraph, SchemaGraphBuilder};
use super::schema_types::{Column, DatabaseInfo, ForeignKey, KeyType, Table};
use crate::llm::EmbeddingProvider;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub is_primary_key: bool,
    pub comment: String,
}

impl ColumnMetadata {
    pub fn nullable(&self) -> bool {
        self.data_type.starts_with("Nullable(")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    pub comment: String,
    pub columns: Vec<ColumnMetadata>,
}

impl TableMetadata {
    fn primary_key(&self) -> Option<&ColumnMetadata> {
        let mut pks = self.columns.iter().filter(|c| c.is_primary_key);
        match (pks.next(), pks.next()) {
            (Some(pk), None) => Some(pk),
            _ => None,
        }
    }

    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

pub struct SchemaDiscovery;

impl SchemaDiscovery {
    /// Introspect a database and return table metadata
    pub async fn introspect(client: &Client, database: &str) -> anyhow::Result<Vec<TableMetadata>> {
        let tables = Self::list_tables(client, database).await?;

        let mut table_metadata = Vec::with_capacity(tables.len());
        for (table_name, comment) in tables {
            let columns = Self::get_columns(client, database, &table_name).await?;
            table_metadata.push(TableMetadata {
                name: table_name,
                comment,
                columns,
            });
        }

        log::info!(
            "Introspected {} tables from ClickHouse database '{}'",
            table_metadata.len(),
            database
        );
        Ok(table_metadata)
    }

    /// List all tables in a database with their comments
    async fn list_tables(client: &Client, database: &str) -> anyhow::Result<Vec<(String, String)>> {
        #[derive(Debug, clickhouse::Row, Deserialize)]
        struct TableRow {
            name: String,
            comment: String,
        }

        let rows: Vec<TableRow> = client
            .query(
                "SELECT name, comment FROM system.tables \
                 WHERE database = ? AND engine NOT IN ('SystemTable', 'MaterializedView') \
                 ORDER BY name",
            )
            .bind(database)
            .fetch_all()
            .await
            .with_context(|| format!("Failed to list tables of '{}'", database))?;

        Ok(rows.into_iter().map(|t| (t.name, t.comment)).collect())
    }

    /// Get columns for a table
    async fn get_columns(
        client: &Client,
        database: &str,
        table: &str,
    ) -> anyhow::Result<Vec<ColumnMetadata>> {
        #[derive(Debug, clickhouse::Row, Deserialize)]
        struct ColumnRow {
            name: String,
            #[serde(rename = "type")]
            data_type: String,
            is_in_primary_key: u8,
            comment: String,
        }

        let rows: Vec<ColumnRow> = client
            .query(
                "SELECT name, type, is_in_primary_key, comment FROM system.columns \
                 WHERE database = ? AND table = ? ORDER BY position",
            )
            .bind(database)
            .bind(table)
            .fetch_all()
            .await
            .with_context(|| format!("Failed to get columns of '{}.{}'", database, table))?;

        Ok(rows
            .into_iter()
            .map(|c| ColumnMetadata {
                name: c.name,
                data_type: c.data_type,
                is_primary_key: c.is_in_primary_key == 1,
                comment: c.comment,
            })
            .collect())
    }

    /// Infer foreign keys from `<entity>_id` columns.
    ///
    /// `customer_id` in `orders` points at the first existing table named `customer`,
    /// `customers` or `customeres` (`category_id` also tries `categories`). The referenced
    /// column is that table's single primary key, else `id`, else a column with the same name.
    pub fn infer_foreign_keys(tables: &[TableMetadata]) -> HashMap<String, Vec<ForeignKey>> {
        // candidates are lowercase, so match table names case-insensitively
        let by_name: HashMap<String, &TableMetadata> = tables
            .iter()
            .map(|t| (t.name.to_lowercase(), t))
            .collect();

        let mut result: HashMap<String, Vec<ForeignKey>> = HashMap::new();
        for table in tables {
            for column in &table.columns {
                let lower = column.name.to_lowercase();
                let Some(base) = lower.strip_suffix("_id") else {
                    continue;
                };
                if base.is_empty() {
                    continue;
                }

                let mut candidates = vec![
                    base.to_string(),
                    format!("{}s", base),
                    format!("{}es", base),
                ];
                if let Some(stem) = base.strip_suffix('y') {
                    candidates.push(format!("{}ies", stem));
                }
                let Some(target) = candidates
                    .iter()
                    .filter_map(|name| by_name.get(name.as_str()))
                    .find(|target| target.name != table.name)
                else {
                    continue;
                };

                let referenced_column = if let Some(pk) = target.primary_key() {
                    pk.name.clone()
                } else if target.has_column("id") {
                    "id".to_string()
                } else if target.has_column(&column.name) {
                    column.name.clone()
                } else {
                    continue;
                };

                result.entry(table.name.clone()).or_default().push(ForeignKey {
                    constraint_name: format!("fk_{}_{}", table.name, column.name),
                    column: column.name.clone(),
                    referenced_table: target.name.clone(),
                    referenced_column,
                });
            }
        }
        result
    }

    pub fn describe_database(database: &str, tables: &[TableMetadata]) -> String {
        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        format!(
            "{} database with {} tables: {}",
            database,
            names.len(),
            names.join(", ")
        )
    }

    /// Whether `description` came from [`Self::describe_database`] rather than an operator
    pub fn is_generated_description(database: &str, description: &str) -> bool {
        description.starts_with(&format!("{} database with ", database))
    }

    fn describe_table(table: &TableMetadata) -> String {
        if !table.comment.trim().is_empty() {
            return table.comment.clone();
        }
        let columns: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        format!("Table {} with columns {}", table.name, columns.join(", "))
    }

    fn describe_column(table: &str, column: &ColumnMetadata) -> String {
        if !column.comment.trim().is_empty() {
            return column.comment.clone();
        }
        format!("Column {} of table {} ({})", column.name, table, column.data_type)
    }

    /// Embed every table and column description and freeze the result into a graph
    pub async fn build_graph(
        database: DatabaseInfo,
        tables: &[TableMetadata],
        embedder: &dyn EmbeddingProvider,
    ) -> anyhow::Result<InMemorySchemaGraph> {
        let mut foreign_keys = Self::infer_foreign_keys(tables);
        let mut builder = SchemaGraphBuilder::new(database);

        for table in tables {
            let description = Self::describe_table(table);
            let embedding = embedder
                .embed(&description)
                .await
                .with_context(|| format!("Failed to embed table '{}'", table.name))?;
            let fks = foreign_keys.remove(&table.name).unwrap_or_default();

            for column in &table.columns {
                let column_description = Self::describe_column(&table.name, column);
                let key_type = if column.is_primary_key {
                    KeyType::Primary
                } else if fks.iter().any(|fk| fk.column == column.name) {
                    KeyType::Foreign
                } else {
                    KeyType::None
                };
                let column_embedding = embedder.embed(&column_description).await.with_context(
                    || format!("Failed to embed column '{}.{}'", table.name, column.name),
                )?;
                builder.add_column(Column {
                    table: table.name.clone(),
                    name: column.name.clone(),
                    description: column_description,
                    data_type: column.data_type.clone(),
                    key_type,
                    nullable: column.nullable(),
                    embedding: column_embedding,
                });
            }

            builder.add_table(Table {
                name: table.name.clone(),
                description,
                foreign_keys: fks,
                embedding,
            });
        }

        Ok(builder.build()?)
    }
}
