use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use super::{prompts, AgentError};
use crate::graph_catalog::DatabaseInfo;
use crate::llm::{
    parse_json_response, ChatMessage, CompletionProvider, CompletionRequest, ResponseParseError,
};
use crate::pipeline::ConversationLog;
use crate::resolver::CandidateTable;

/// SQL generation outcome for one question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlAnalysis {
    #[serde(default)]
    pub is_sql_translatable: bool,
    #[serde(default)]
    pub instructions_comments: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub sql_query: String,
    #[serde(default, deserialize_with = "string_or_list")]
    pub tables_used: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub missing_information: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub ambiguities: Vec<String>,
    /// 0..=100
    #[serde(default, deserialize_with = "confidence")]
    pub confidence: u8,
    /// Raw completion text when the reply could not be decoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SqlAnalysis {
    pub fn unparseable(err: ResponseParseError) -> Self {
        SqlAnalysis {
            is_sql_translatable: false,
            instructions_comments: String::new(),
            explanation: err.to_string(),
            sql_query: String::new(),
            tables_used: Vec::new(),
            missing_information: Vec::new(),
            ambiguities: Vec::new(),
            confidence: 0,
            error: Some(err.raw),
        }
    }

    pub fn from_completion(raw: &str) -> Self {
        match parse_json_response::<SqlAnalysis>(raw) {
            Ok(analysis) => analysis,
            Err(e) => {
                log::warn!("SQL generator output not understood: {}", e);
                SqlAnalysis::unparseable(e)
            }
        }
    }

    /// Translatable and carrying a statement to run
    pub fn is_executable(&self) -> bool {
        self.is_sql_translatable && !self.sql_query.trim().is_empty()
    }
}

/// `["a", "b"]` → `"- a\n- b"`; empty stays empty
pub fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {}", item.trim_start_matches('-').trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Nothing(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) if s.trim().is_empty() => Vec::new(),
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(items) => items,
        OneOrMany::Nothing(()) => Vec::new(),
    })
}

fn confidence<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0);
    Ok(value.clamp(0.0, 100.0).round() as u8)
}

#[async_trait]
pub trait SqlGenerator: Send + Sync {
    /// `instructions` is empty when the user supplied none
    async fn generate(
        &self,
        question: &str,
        schema: &[CandidateTable],
        database: &DatabaseInfo,
        history: &ConversationLog,
        instructions: &str,
    ) -> Result<SqlAnalysis, AgentError>;
}

pub struct LlmSqlGenerator {
    provider: Arc<dyn CompletionProvider>,
}

impl LlmSqlGenerator {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl SqlGenerator for LlmSqlGenerator {
    async fn generate(
        &self,
        question: &str,
        schema: &[CandidateTable],
        database: &DatabaseInfo,
        history: &ConversationLog,
        instructions: &str,
    ) -> Result<SqlAnalysis, AgentError> {
        let prompt = prompts::analysis_prompt(
            question,
            &prompts::format_schema(schema),
            &database.description,
            instructions,
            &history.transcript(),
        );
        let mut messages = history.messages();
        messages.push(ChatMessage::user(prompt));

        let raw = self
            .provider
            .complete(CompletionRequest::new(messages))
            .await
            .map_err(AgentError::completion("sql generation"))?;

        Ok(SqlAnalysis::from_completion(&raw))
    }
}
