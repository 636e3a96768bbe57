use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{prompts, AgentError};
use crate::graph_catalog::DatabaseInfo;
use crate::llm::{parse_json_response, ChatMessage, CompletionProvider, CompletionRequest};
use crate::pipeline::ConversationLog;

/// Whether a question belongs to the database it was asked against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelevancyVerdict {
    OnTopic,
    OffTopic {
        reason: String,
        suggestions: Vec<String>,
    },
    Inappropriate {
        reason: String,
        suggestions: Vec<String>,
    },
    /// The classifier answered, but not in a form we understand
    Unparseable { raw: String, error: String },
}

impl RelevancyVerdict {
    pub fn is_on_topic(&self) -> bool {
        matches!(self, RelevancyVerdict::OnTopic)
    }
}

#[derive(Debug, Deserialize)]
struct RelevancyReply {
    status: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    suggestions: Vec<String>,
}

impl RelevancyVerdict {
    /// Interpret a raw classifier completion
    pub fn from_completion(raw: &str) -> Self {
        let reply: RelevancyReply = match parse_json_response(raw) {
            Ok(reply) => reply,
            Err(e) => {
                return RelevancyVerdict::Unparseable {
                    raw: e.raw.clone(),
                    error: e.to_string(),
                }
            }
        };

        match reply.status.trim().to_lowercase().as_str() {
            "on-topic" => RelevancyVerdict::OnTopic,
            "off-topic" => RelevancyVerdict::OffTopic {
                reason: reply.reason,
                suggestions: reply.suggestions,
            },
            "inappropriate" => RelevancyVerdict::Inappropriate {
                reason: reply.reason,
                suggestions: reply.suggestions,
            },
            other => RelevancyVerdict::Unparseable {
                raw: raw.to_string(),
                error: format!("Unknown relevancy status '{}'", other),
            },
        }
    }
}

#[async_trait]
pub trait RelevancyClassifier: Send + Sync {
    async fn classify(
        &self,
        question: &str,
        database: &DatabaseInfo,
        history: &ConversationLog,
    ) -> Result<RelevancyVerdict, AgentError>;
}

pub struct LlmRelevancyClassifier {
    provider: Arc<dyn CompletionProvider>,
}

impl LlmRelevancyClassifier {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl RelevancyClassifier for LlmRelevancyClassifier {
    async fn classify(
        &self,
        question: &str,
        database: &DatabaseInfo,
        history: &ConversationLog,
    ) -> Result<RelevancyVerdict, AgentError> {
        let mut messages = vec![ChatMessage::system(prompts::relevancy_system_prompt())];
        messages.extend(history.messages());
        messages.push(ChatMessage::user(prompts::relevancy_user_prompt(
            question,
            &database.description,
        )));

        let raw = self
            .provider
            .complete(CompletionRequest::new(messages))
            .await
            .map_err(AgentError::completion("relevancy"))?;

        let verdict = RelevancyVerdict::from_completion(&raw);
        if let RelevancyVerdict::Unparseable { error, .. } = &verdict {
            log::warn!("Relevancy classifier output not understood: {}", error);
        }
        Ok(verdict)
    }
}
