use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::errors::GraphSchemaError;
use super::store::{GraphResult, SchemaGraph, SchemaGraphStore};

/// Process-local registry of schema graphs, keyed by graph id
#[derive(Default)]
pub struct InMemoryGraphStore {
    graphs: RwLock<HashMap<String, Arc<dyn SchemaGraph>>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SchemaGraphStore for InMemoryGraphStore {
    async fn select_graph(&self, graph_id: &str) -> GraphResult<Arc<dyn SchemaGraph>> {
        self.graphs
            .read()
            .await
            .get(graph_id)
            .cloned()
            .ok_or_else(|| GraphSchemaError::GraphNotFound {
                graph_id: graph_id.to_string(),
            })
    }

    async fn list_graphs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.graphs.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn replace_graph(&self, graph_id: &str, graph: Arc<dyn SchemaGraph>) {
        log::debug!("Installing schema graph '{}'", graph_id);
        self.graphs.write().await.insert(graph_id.to_string(), graph);
    }

    async fn delete_graph(&self, graph_id: &str) -> bool {
        self.graphs.write().await.remove(graph_id).is_some()
    }
}
