use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{prompts, AgentError};
use crate::graph_catalog::DatabaseInfo;
use crate::llm::{ChatMessage, CompletionProvider, CompletionRequest};

#[async_trait]
pub trait ResponseFormatter: Send + Sync {
    /// Summarise executed SQL and its rows as a plain-language answer
    async fn format(
        &self,
        question: &str,
        sql: &str,
        rows: &[Value],
        database: &DatabaseInfo,
    ) -> Result<String, AgentError>;
}

pub struct LlmResponseFormatter {
    provider: Arc<dyn CompletionProvider>,
}

impl LlmResponseFormatter {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ResponseFormatter for LlmResponseFormatter {
    async fn format(
        &self,
        question: &str,
        sql: &str,
        rows: &[Value],
        database: &DatabaseInfo,
    ) -> Result<String, AgentError> {
        let prompt = prompts::formatter_prompt(question, sql, rows, &database.description);
        let answer = self
            .provider
            .complete(CompletionRequest::new(vec![ChatMessage::user(prompt)]).temperature(0.3))
            .await
            .map_err(AgentError::completion("response formatting"))?;
        Ok(answer.trim().to_string())
    }
}
