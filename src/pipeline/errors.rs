use thiserror::Error;

use super::confirmation::ConfirmationError;
use crate::agents::AgentError;
use crate::executor::ExecutionError;
use crate::graph_catalog::GraphSchemaError;
use crate::resolver::ResolveError;

/// Terminal failure of one turn; each maps to exactly one `error` event
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("Timeout error while finding tables relevant to your request.")]
    ResolveTimeout,
    #[error("Error finding relevant tables: {0}")]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Graph(#[from] GraphSchemaError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error("Error executing query: {0}")]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Confirmation(#[from] ConfirmationError),
    #[error("Request must contain at least one question")]
    EmptyQuestion,
    /// The client went away; nothing can be reported
    #[error("Event stream closed by client")]
    StreamClosed,
}
