//! OpenAI-compatible HTTP client (chat completions + embeddings)

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;

use super::{ChatMessage, CompletionProvider, CompletionRequest, EmbeddingProvider, LlmError};

const PROVIDER: &str = "openai";

pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    completion_model: String,
    embedding_model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        completion_model: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            completion_model: completion_model.into(),
            embedding_model: embedding_model.into(),
        }
    }

    async fn post<Req: Serialize, Res: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &Req,
    ) -> Result<Res, LlmError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Transport {
                provider: PROVIDER.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                message: format!("Failed to parse response: {}", e),
            });
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let message = match serde_json::from_str::<ApiError>(&error_text) {
            Ok(api_error) => api_error.error.message,
            Err(_) => error_text,
        };
        Err(LlmError::Request {
            provider: PROVIDER.to_string(),
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.completion_model,
            messages: &request.messages,
            temperature: request.temperature,
            response_format: request
                .json_mode
                .then(|| json!({ "type": "json_object" })),
        };
        let response: ChatResponse = self.post("chat/completions", &body).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                message: "completion returned no content".to_string(),
            })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let body = EmbeddingRequest {
            model: &self.embedding_model,
            input: text,
        };
        let response: EmbeddingResponse = self.post("embeddings", &body).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                message: "embedding response had no data".to_string(),
            })
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("completion_model", &self.completion_model)
            .field("embedding_model", &self.embedding_model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}
