pub mod errors;
pub mod memory_graph;
pub mod memory_store;
pub mod schema_discovery;
pub mod schema_types;
pub mod store;

// Re-export commonly used types
pub use errors::GraphSchemaError;
pub use memory_graph::{EdgeKind, InMemorySchemaGraph, SchemaGraphBuilder, SchemaNode};
pub use memory_store::InMemoryGraphStore;
pub use schema_discovery::SchemaDiscovery;
pub use schema_types::{
    Column, ColumnInfo, DatabaseInfo, ForeignKey, KeyType, PathNode, Table, TableRecord,
};
pub use store::{GraphResult, SchemaGraph, SchemaGraphStore};
