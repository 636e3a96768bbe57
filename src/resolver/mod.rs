//! Schema relevance resolution.
//!
//! Turns the hints produced for a question into the smallest set of tables the
//! SQL generator needs. Four searches feed one [`CandidateSet`]:
//!
//! 1. nearest tables for every table hint
//! 2. nearest columns for every column hint, surfaced as their owning tables
//! 3. tables one foreign-key hop away from a search (1) hit ("sphere")
//! 4. tables on shortest paths between every pair of search (1) hits
//!
//! Results are merged in that precedence: tables, columns, connecting tables,
//! sphere.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join_all, try_join, try_join_all};
use thiserror::Error;

use crate::graph_catalog::{
    GraphSchemaError, KeyType, PathNode, SchemaGraph, SchemaGraphStore, TableRecord,
};
use crate::llm::{EmbeddingProvider, LlmError};

pub mod candidate;

pub use candidate::{CandidateSet, CandidateTable, FOREIGN_KEY_LABEL};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    #[error(transparent)]
    Graph(#[from] GraphSchemaError),
    #[error("Failed to embed hint '{hint}': {source}")]
    Embedding {
        hint: String,
        #[source]
        source: LlmError,
    },
}

/// Search tuning knobs
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverSettings {
    /// Neighbours returned per hint
    pub top_k: usize,
    /// Longest path (in edges) considered when connecting two tables
    pub path_max_depth: usize,
    /// Budget for one pair's shortest-path query
    pub pair_timeout: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            top_k: 3,
            path_max_depth: 9,
            pair_timeout: Duration::from_millis(50),
        }
    }
}

pub struct RelevanceResolver {
    store: Arc<dyn SchemaGraphStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    settings: ResolverSettings,
}

impl RelevanceResolver {
    pub fn new(
        store: Arc<dyn SchemaGraphStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            settings,
        }
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Resolve the tables relevant to a set of hints.
    ///
    /// An empty result is not an error; the caller decides what "no schema"
    /// means for the turn.
    pub async fn resolve(
        &self,
        graph_id: &str,
        table_hints: &[String],
        column_hints: &[String],
    ) -> Result<Vec<CandidateTable>, ResolveError> {
        let graph = self.store.select_graph(graph_id).await?;
        let table_hints = non_empty(table_hints);
        let column_hints = non_empty(column_hints);

        let (by_tables, by_columns) = try_join(
            self.search(graph.as_ref(), &table_hints, SearchTarget::Tables),
            self.search(graph.as_ref(), &column_hints, SearchTarget::Columns),
        )
        .await?;

        let anchors = unique_names(&by_tables);
        let (route, sphere) = try_join(
            self.connecting_tables(graph.as_ref(), &anchors),
            self.sphere(graph.as_ref(), &anchors),
        )
        .await?;

        log::debug!(
            "Resolver hits for '{}': {} by table, {} by column, {} connecting, {} sphere",
            graph_id,
            by_tables.len(),
            by_columns.len(),
            route.len(),
            sphere.len()
        );

        let mut candidates = CandidateSet::new();
        candidates.extend(by_tables);
        candidates.extend(by_columns);
        candidates.extend(route);
        candidates.extend(sphere);

        log::info!(
            "Resolved {} candidate tables for graph '{}'",
            candidates.len(),
            graph_id
        );
        Ok(candidates.into_tables())
    }

    async fn search(
        &self,
        graph: &dyn SchemaGraph,
        hints: &[&str],
        target: SearchTarget,
    ) -> Result<Vec<TableRecord>, ResolveError> {
        let per_hint = try_join_all(hints.iter().map(|hint| async move {
            let vector = self
                .embedder
                .embed(hint)
                .await
                .map_err(|source| ResolveError::Embedding {
                    hint: hint.to_string(),
                    source,
                })?;
            let found = match target {
                SearchTarget::Tables => graph.nearest_tables(&vector, self.settings.top_k).await?,
                SearchTarget::Columns => graph.nearest_columns(&vector, self.settings.top_k).await?,
            };
            Ok::<_, ResolveError>(found)
        }))
        .await?;

        Ok(per_hint.into_iter().flatten().collect())
    }

    async fn sphere(
        &self,
        graph: &dyn SchemaGraph,
        anchors: &[String],
    ) -> Result<Vec<TableRecord>, ResolveError> {
        let neighbours =
            try_join_all(anchors.iter().map(|table| graph.one_hop_neighbors(table))).await?;
        Ok(neighbours.into_iter().flatten().collect())
    }

    /// Tables lying on a shortest path between any two anchors.
    ///
    /// A pair that errors or exceeds its budget contributes nothing.
    async fn connecting_tables(
        &self,
        graph: &dyn SchemaGraph,
        anchors: &[String],
    ) -> Result<Vec<TableRecord>, ResolveError> {
        let pairs: Vec<(&String, &String)> = anchors
            .iter()
            .enumerate()
            .flat_map(|(i, a)| anchors[i + 1..].iter().map(move |b| (a, b)))
            .collect();
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let paths = join_all(pairs.iter().map(|(a, b)| async move {
            let query = graph.shortest_path_nodes(a, b, self.settings.path_max_depth);
            match tokio::time::timeout(self.settings.pair_timeout, query).await {
                Ok(Ok(nodes)) => nodes,
                Ok(Err(e)) => {
                    log::warn!("Skipping path search {} <-> {}: {}", a, b, e);
                    Vec::new()
                }
                Err(_) => {
                    log::warn!(
                        "Skipping path search {} <-> {}: exceeded {:?}",
                        a,
                        b,
                        self.settings.pair_timeout
                    );
                    Vec::new()
                }
            }
        }))
        .await;

        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for node in paths.into_iter().flatten() {
            let name = match node {
                PathNode::Table { name } => name,
                PathNode::Column {
                    table,
                    key_type: KeyType::Primary,
                    ..
                } => table,
                PathNode::Column { .. } => continue,
            };
            if seen.insert(name.clone()) {
                names.push(name);
            }
        }

        if names.is_empty() {
            return Ok(Vec::new());
        }
        Ok(graph.tables(&names).await?)
    }
}

#[derive(Debug, Clone, Copy)]
enum SearchTarget {
    Tables,
    Columns,
}

fn non_empty(hints: &[String]) -> Vec<&str> {
    hints
        .iter()
        .map(|h| h.trim())
        .filter(|h| !h.is_empty())
        .collect()
}

fn unique_names(records: &[TableRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| seen.insert(r.name.as_str()))
        .map(|r| r.name.clone())
        .collect()
}
