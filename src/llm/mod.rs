//! Completion and embedding providers.
//!
//! The pipeline never talks HTTP directly: agents go through
//! [`CompletionProvider`], the resolver and schema loader through
//! [`EmbeddingProvider`]. [`openai::OpenAiClient`] implements both against any
//! OpenAI-compatible endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod openai;
pub mod response;

pub use openai::OpenAiClient;
pub use response::{parse_json_response, ResponseParseError};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LlmError {
    #[error("{provider} request failed with status {status}: {message}")]
    Request {
        provider: String,
        status: u16,
        message: String,
    },
    #[error("{provider} transport error: {message}")]
    Transport { provider: String, message: String },
    #[error("{provider} returned an invalid response: {message}")]
    InvalidResponse { provider: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One request/response completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    /// Ask the provider to constrain output to a JSON object
    pub json_mode: bool,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: 0.0,
            json_mode: false,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Returns the assistant message content
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}
