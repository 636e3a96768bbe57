//! Query interface the resolver consumes.
//!
//! A schema graph holds `Table` and `Column` nodes joined by `BELONGS_TO`
//! (column -> table) and `REFERENCES` (column -> column) edges. Any backend that
//! can answer these queries is substitutable: the bundled in-memory graph, a
//! graph database with a vector index, or a relational catalog with a side index.

use std::sync::Arc;

use async_trait::async_trait;

use super::errors::GraphSchemaError;
use super::schema_types::{DatabaseInfo, PathNode, TableRecord};

pub type GraphResult<T> = Result<T, GraphSchemaError>;

/// Queries against one loaded schema graph
#[async_trait]
pub trait SchemaGraph: Send + Sync {
    /// The graph's `Database` node
    fn database(&self) -> &DatabaseInfo;

    /// Top-`k` tables by embedding distance, nearest first, each with all its columns.
    /// Equal distances keep the store's native order.
    async fn nearest_tables(&self, vector: &[f32], k: usize) -> GraphResult<Vec<TableRecord>>;

    /// Top-`k` columns by embedding distance, returned as their owning tables
    /// (one entry per matched column, nearest first).
    async fn nearest_columns(&self, vector: &[f32], k: usize) -> GraphResult<Vec<TableRecord>>;

    /// Tables one foreign-key hop away:
    /// `table -> column -> REFERENCES -> column -> owning table`, either direction.
    async fn one_hop_neighbors(&self, table: &str) -> GraphResult<Vec<TableRecord>>;

    /// Every node on any shortest path between two table nodes, bounded by `max_depth` hops.
    /// Unreachable or unknown tables yield an empty list.
    async fn shortest_path_nodes(
        &self,
        table_a: &str,
        table_b: &str,
        max_depth: usize,
    ) -> GraphResult<Vec<PathNode>>;

    /// Hydrate tables by name, skipping names that are not in the graph
    async fn tables(&self, names: &[String]) -> GraphResult<Vec<TableRecord>>;
}

/// All schema graphs, keyed by graph id
#[async_trait]
pub trait SchemaGraphStore: Send + Sync {
    async fn select_graph(&self, graph_id: &str) -> GraphResult<Arc<dyn SchemaGraph>>;

    async fn list_graphs(&self) -> Vec<String>;

    /// Install (or overwrite) the graph stored under `graph_id`
    async fn replace_graph(&self, graph_id: &str, graph: Arc<dyn SchemaGraph>);

    /// Drop the graph stored under `graph_id`; returns whether one existed
    async fn delete_graph(&self, graph_id: &str) -> bool;
}
