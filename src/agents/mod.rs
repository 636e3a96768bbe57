//! Completion collaborators used by the pipeline.
//!
//! Each collaborator is one request/response call to a language model behind a
//! trait, so the orchestrator can run against scripted stand-ins.

use thiserror::Error;

use crate::llm::LlmError;

pub mod analysis;
pub mod formatter;
pub mod hints;
pub mod prompts;
pub mod relevancy;

pub use analysis::{LlmSqlGenerator, SqlAnalysis, SqlGenerator};
pub use formatter::{LlmResponseFormatter, ResponseFormatter};
pub use hints::{HintExtractor, LlmHintExtractor, SchemaHints};
pub use relevancy::{LlmRelevancyClassifier, RelevancyClassifier, RelevancyVerdict};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AgentError {
    #[error("{agent} completion failed: {source}")]
    Completion {
        agent: &'static str,
        #[source]
        source: LlmError,
    },
}

impl AgentError {
    pub(crate) fn completion(agent: &'static str) -> impl FnOnce(LlmError) -> Self {
        move |source| AgentError::Completion { agent, source }
    }
}
