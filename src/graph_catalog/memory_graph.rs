//! In-memory schema graph for small schemas.
//!
//! Nodes are tables and columns. Edges are `BELONGS_TO` (column -> table) and
//! `REFERENCES` (foreign-key column -> referenced column). The graph is undirected,
//! matching how the resolver walks the schema.

use std::collections::HashMap;

use async_trait::async_trait;
use petgraph::algo::dijkstra;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

use super::errors::GraphSchemaError;
use super::schema_types::{Column, DatabaseInfo, PathNode, Table, TableRecord};
use super::store::{GraphResult, SchemaGraph};

/// Node weight
#[derive(Debug, Clone)]
pub enum SchemaNode {
    Table(Table),
    Column(Column),
}

/// Edge weight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    BelongsTo,
    References,
}

/// Builder that validates tables, columns and foreign keys before freezing a graph
#[derive(Debug, Clone)]
pub struct SchemaGraphBuilder {
    database: DatabaseInfo,
    tables: Vec<Table>,
    columns: Vec<Column>,
}

impl SchemaGraphBuilder {
    pub fn new(database: DatabaseInfo) -> Self {
        Self {
            database,
            tables: Vec::new(),
            columns: Vec::new(),
        }
    }

    pub fn table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn add_table(&mut self, table: Table) {
        self.tables.push(table);
    }

    pub fn add_column(&mut self, column: Column) {
        self.columns.push(column);
    }

    pub fn build(self) -> Result<InMemorySchemaGraph, GraphSchemaError> {
        let mut dimension: Option<usize> = None;
        let mut check_dim = |len: usize| -> Result<(), GraphSchemaError> {
            match dimension {
                None => {
                    dimension = Some(len);
                    Ok(())
                }
                Some(expected) if expected == len => Ok(()),
                Some(expected) => Err(GraphSchemaError::DimensionMismatch {
                    expected,
                    actual: len,
                }),
            }
        };

        let mut graph: UnGraph<SchemaNode, EdgeKind> =
            UnGraph::with_capacity(self.tables.len() + self.columns.len(), self.columns.len());

        let mut table_indices = HashMap::with_capacity(self.tables.len());
        let mut table_order = Vec::with_capacity(self.tables.len());
        for table in self.tables {
            if table_indices.contains_key(&table.name) {
                return Err(GraphSchemaError::DuplicateTable { table: table.name });
            }
            check_dim(table.embedding.len())?;
            let name = table.name.clone();
            let idx = graph.add_node(SchemaNode::Table(table));
            table_indices.insert(name, idx);
            table_order.push(idx);
        }

        let mut column_indices: HashMap<(String, String), NodeIndex> = HashMap::new();
        let mut column_order = Vec::with_capacity(self.columns.len());
        for column in self.columns {
            let owner = *table_indices
                .get(&column.table)
                .ok_or_else(|| GraphSchemaError::InvalidTable {
                    table: column.table.clone(),
                })?;
            let key = (column.table.clone(), column.name.clone());
            if column_indices.contains_key(&key) {
                return Err(GraphSchemaError::DuplicateColumn {
                    column: column.name,
                    table: column.table,
                });
            }
            check_dim(column.embedding.len())?;
            let idx = graph.add_node(SchemaNode::Column(column));
            graph.add_edge(idx, owner, EdgeKind::BelongsTo);
            column_indices.insert(key, idx);
            column_order.push(idx);
        }

        let mut references = Vec::new();
        for &idx in &table_order {
            let SchemaNode::Table(table) = &graph[idx] else {
                continue;
            };
            for fk in &table.foreign_keys {
                let context = format!("While wiring foreign key {}", fk.constraint_name);
                let source = *column_indices
                    .get(&(table.name.clone(), fk.column.clone()))
                    .ok_or_else(|| {
                        GraphSchemaError::column_error_with_context(
                            &fk.column,
                            &table.name,
                            &context,
                        )
                    })?;
                if !table_indices.contains_key(&fk.referenced_table) {
                    return Err(GraphSchemaError::InvalidTable {
                        table: fk.referenced_table.clone(),
                    });
                }
                let target = *column_indices
                    .get(&(fk.referenced_table.clone(), fk.referenced_column.clone()))
                    .ok_or_else(|| {
                        GraphSchemaError::column_error_with_context(
                            &fk.referenced_column,
                            &fk.referenced_table,
                            &context,
                        )
                    })?;
                references.push((source, target));
            }
        }
        for (source, target) in references {
            if source != target {
                // update_edge keeps one REFERENCES edge per column pair
                graph.update_edge(source, target, EdgeKind::References);
            }
        }

        Ok(InMemorySchemaGraph {
            database: self.database,
            dimension,
            graph,
            table_indices,
            table_order,
            column_order,
        })
    }
}

/// Frozen schema graph answering the [`SchemaGraph`] queries
#[derive(Debug, Clone)]
pub struct InMemorySchemaGraph {
    database: DatabaseInfo,
    dimension: Option<usize>,
    graph: UnGraph<SchemaNode, EdgeKind>,
    table_indices: HashMap<String, NodeIndex>,
    /// Insertion order, used to break ranking ties
    table_order: Vec<NodeIndex>,
    column_order: Vec<NodeIndex>,
}

impl InMemorySchemaGraph {
    pub fn table_count(&self) -> usize {
        self.table_order.len()
    }

    pub fn column_count(&self) -> usize {
        self.column_order.len()
    }

    /// Nodes joined to `idx` by an edge of `kind`, in insertion order
    fn linked(&self, idx: NodeIndex, kind: EdgeKind) -> Vec<NodeIndex> {
        let mut nodes: Vec<NodeIndex> = self
            .graph
            .edges(idx)
            .filter(|edge| *edge.weight() == kind)
            .map(|edge| {
                if edge.source() == idx {
                    edge.target()
                } else {
                    edge.source()
                }
            })
            .collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }

    fn owner(&self, column: NodeIndex) -> Option<NodeIndex> {
        self.linked(column, EdgeKind::BelongsTo).into_iter().next()
    }

    fn record(&self, idx: NodeIndex) -> Option<TableRecord> {
        let SchemaNode::Table(table) = &self.graph[idx] else {
            return None;
        };
        let columns = self
            .linked(idx, EdgeKind::BelongsTo)
            .into_iter()
            .filter_map(|c| match &self.graph[c] {
                SchemaNode::Column(column) => Some(column.info()),
                SchemaNode::Table(_) => None,
            })
            .collect();
        Some(TableRecord {
            name: table.name.clone(),
            description: table.description.clone(),
            foreign_keys: table.foreign_keys.clone(),
            columns,
        })
    }

    fn embedding(&self, idx: NodeIndex) -> &[f32] {
        match &self.graph[idx] {
            SchemaNode::Table(table) => &table.embedding,
            SchemaNode::Column(column) => &column.embedding,
        }
    }

    fn check_query_dimension(&self, vector: &[f32]) -> GraphResult<()> {
        match self.dimension {
            Some(expected) if expected != vector.len() => Err(GraphSchemaError::DimensionMismatch {
                expected,
                actual: vector.len(),
            }),
            _ => Ok(()),
        }
    }

    /// The `k` nodes nearest to `vector`. The sort is stable so ties keep insertion order.
    fn rank(&self, nodes: &[NodeIndex], vector: &[f32], k: usize) -> Vec<NodeIndex> {
        let mut scored: Vec<(NodeIndex, f32)> = nodes
            .iter()
            .map(|&idx| (idx, euclidean(self.embedding(idx), vector)))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(k).map(|(idx, _)| idx).collect()
    }

    /// Hop counts from `start` over both edge kinds
    fn distances(&self, start: NodeIndex) -> HashMap<NodeIndex, usize> {
        dijkstra(&self.graph, start, None, |_| 1usize)
    }

    fn path_node(&self, idx: NodeIndex) -> PathNode {
        match &self.graph[idx] {
            SchemaNode::Table(table) => PathNode::Table {
                name: table.name.clone(),
            },
            SchemaNode::Column(column) => PathNode::Column {
                table: column.table.clone(),
                name: column.name.clone(),
                key_type: column.key_type,
            },
        }
    }
}

#[async_trait]
impl SchemaGraph for InMemorySchemaGraph {
    fn database(&self) -> &DatabaseInfo {
        &self.database
    }

    async fn nearest_tables(&self, vector: &[f32], k: usize) -> GraphResult<Vec<TableRecord>> {
        self.check_query_dimension(vector)?;
        Ok(self
            .rank(&self.table_order, vector, k)
            .into_iter()
            .filter_map(|t| self.record(t))
            .collect())
    }

    async fn nearest_columns(&self, vector: &[f32], k: usize) -> GraphResult<Vec<TableRecord>> {
        self.check_query_dimension(vector)?;
        Ok(self
            .rank(&self.column_order, vector, k)
            .into_iter()
            .filter_map(|c| self.owner(c))
            .filter_map(|t| self.record(t))
            .collect())
    }

    async fn one_hop_neighbors(&self, table: &str) -> GraphResult<Vec<TableRecord>> {
        let Some(&start) = self.table_indices.get(table) else {
            return Ok(Vec::new());
        };

        let mut seen: Vec<NodeIndex> = Vec::new();
        for column in self.linked(start, EdgeKind::BelongsTo) {
            for referenced in self.linked(column, EdgeKind::References) {
                if let Some(owner) = self.owner(referenced) {
                    if !seen.contains(&owner) {
                        seen.push(owner);
                    }
                }
            }
        }
        Ok(seen.into_iter().filter_map(|t| self.record(t)).collect())
    }

    async fn shortest_path_nodes(
        &self,
        table_a: &str,
        table_b: &str,
        max_depth: usize,
    ) -> GraphResult<Vec<PathNode>> {
        let (Some(&a), Some(&b)) = (self.table_indices.get(table_a), self.table_indices.get(table_b))
        else {
            return Ok(Vec::new());
        };
        if a == b {
            return Ok(Vec::new());
        }

        let from_a = self.distances(a);
        let length = match from_a.get(&b) {
            Some(&length) if length <= max_depth => length,
            _ => return Ok(Vec::new()),
        };
        let from_b = self.distances(b);

        // v is on some shortest path iff dist(a, v) + dist(v, b) == dist(a, b)
        let mut on_path: Vec<(usize, NodeIndex)> = from_a
            .iter()
            .filter_map(|(node, &da)| match from_b.get(node) {
                Some(&db) if da + db == length => Some((da, *node)),
                _ => None,
            })
            .collect();
        on_path.sort();

        Ok(on_path
            .into_iter()
            .map(|(_, idx)| self.path_node(idx))
            .collect())
    }

    async fn tables(&self, names: &[String]) -> GraphResult<Vec<TableRecord>> {
        Ok(names
            .iter()
            .filter_map(|name| self.table_indices.get(name))
            .filter_map(|&t| self.record(t))
            .collect())
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
