//! # Schema Graph Error Types
//!
//! Errors raised while building a schema graph or querying one.
//!
//! ## Error Categories
//!
//! - **Build Errors**: duplicate tables, foreign keys pointing at columns that do not exist
//! - **Query Errors**: unknown graphs, embedding vectors of the wrong dimension
//! - **Backend Errors**: failures reported by an external graph store
//!
//! When returning build errors, use the context helpers so the message says what
//! was being loaded:
//!
//! ```ignore
//! GraphSchemaError::column_error_with_context(
//!     "customer_id",
//!     "orders",
//!     "While wiring foreign key fk_orders_customer_id",
//! )
//! ```

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GraphSchemaError {
    #[error("No schema graph loaded for `{graph_id}`")]
    GraphNotFound { graph_id: String },
    #[error("Table `{table}` is defined more than once")]
    DuplicateTable { table: String },
    #[error("Column `{column}` is defined more than once in table `{table}`")]
    DuplicateColumn { column: String, table: String },
    #[error("Column `{column}` not found in table `{table}`")]
    InvalidColumn { column: String, table: String },
    #[error("Table `{table}` does not exist")]
    InvalidTable { table: String },
    #[error("Embedding has {actual} dimensions, graph index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Graph store query failed: {message}")]
    Backend { message: String },
}

/// Helper methods for creating errors with context information
impl GraphSchemaError {
    /// Create an InvalidColumn error with context information
    ///
    /// # Example
    /// ```ignore
    /// GraphSchemaError::column_error_with_context(
    ///     "customer_id",
    ///     "orders",
    ///     "While wiring foreign key fk_orders_customer_id",
    /// )
    /// ```
    pub fn column_error_with_context(
        column: impl Into<String>,
        table: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        let column = column.into();
        let ctx = context.into();
        GraphSchemaError::InvalidColumn {
            column: format!("{}\n  Context: {}", column, ctx),
            table: table.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        GraphSchemaError::Backend {
            message: message.into(),
        }
    }
}
