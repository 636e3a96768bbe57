use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{prompts, AgentError};
use crate::graph_catalog::DatabaseInfo;
use crate::llm::{parse_json_response, ChatMessage, CompletionProvider, CompletionRequest};
use crate::pipeline::ConversationLog;

/// Natural-language descriptions of the data a question needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaHints {
    pub tables: Vec<String>,
    pub columns: Vec<String>,
}

impl SchemaHints {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.columns.is_empty()
    }

    /// Decode extractor output; anything unreadable yields no hints
    pub fn from_completion(raw: &str) -> Self {
        match parse_json_response::<HintsReply>(raw) {
            Ok(reply) => SchemaHints {
                tables: texts(reply.tables_descriptions),
                columns: texts(reply.columns_descriptions),
            },
            Err(e) => {
                log::warn!("Hint extractor output not understood: {}", e);
                SchemaHints::default()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct HintsReply {
    #[serde(default)]
    tables_descriptions: Vec<Described>,
    #[serde(default)]
    columns_descriptions: Vec<Described>,
}

#[derive(Debug, Deserialize)]
struct Described {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
}

/// Prefer the description; fall back to the name; drop blanks
fn texts(items: Vec<Described>) -> Vec<String> {
    items
        .into_iter()
        .filter_map(|item| {
            let description = item.description.trim();
            let text = if description.is_empty() {
                item.name.trim()
            } else {
                description
            };
            (!text.is_empty()).then(|| text.to_string())
        })
        .collect()
}

#[async_trait]
pub trait HintExtractor: Send + Sync {
    async fn extract(
        &self,
        question: &str,
        database: &DatabaseInfo,
        history: &ConversationLog,
    ) -> Result<SchemaHints, AgentError>;
}

pub struct LlmHintExtractor {
    provider: Arc<dyn CompletionProvider>,
}

impl LlmHintExtractor {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl HintExtractor for LlmHintExtractor {
    async fn extract(
        &self,
        question: &str,
        database: &DatabaseInfo,
        history: &ConversationLog,
    ) -> Result<SchemaHints, AgentError> {
        let messages = vec![
            ChatMessage::system(prompts::hints_system_prompt(&database.description)),
            ChatMessage::user(prompts::hints_user_prompt(question, &history.questions())),
        ];
        let raw = self
            .provider
            .complete(CompletionRequest::new(messages).json())
            .await
            .map_err(AgentError::completion("hint extraction"))?;

        let hints = SchemaHints::from_completion(&raw);
        log::info!(
            "Extracted {} table hints and {} column hints",
            hints.tables.len(),
            hints.columns.len()
        );
        Ok(hints)
    }
}
