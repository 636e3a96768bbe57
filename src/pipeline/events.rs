//! Progress events streamed to the client during a turn

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use super::errors::PipelineError;

/// Written after every serialized event on the response stream
pub const MESSAGE_DELIMITER: &str = "|||QUERY_MESSAGE_BOUNDARY|||";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    ReasoningStep {
        message: String,
    },
    FollowupQuestions {
        message: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        suggestions: Vec<String>,
    },
    DestructiveConfirmation {
        message: String,
        sql_query: String,
        operation_type: String,
        /// Echo this back on the confirm call
        confirmation_token: String,
    },
    FinalResult {
        data: String,
        conf: u8,
        miss: String,
        amb: String,
        exp: String,
        is_valid: bool,
    },
    QueryResult {
        data: Vec<Value>,
    },
    SchemaRefresh {
        message: String,
        refresh_status: RefreshStatus,
    },
    AiResponse {
        message: String,
    },
    OperationCancelled {
        message: String,
    },
    Error {
        message: String,
    },
}

impl PipelineEvent {
    pub fn step(message: impl Into<String>) -> Self {
        PipelineEvent::ReasoningStep {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        PipelineEvent::Error {
            message: message.into(),
        }
    }

    /// Short name matching the serialized `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::ReasoningStep { .. } => "reasoning_step",
            PipelineEvent::FollowupQuestions { .. } => "followup_questions",
            PipelineEvent::DestructiveConfirmation { .. } => "destructive_confirmation",
            PipelineEvent::FinalResult { .. } => "final_result",
            PipelineEvent::QueryResult { .. } => "query_result",
            PipelineEvent::SchemaRefresh { .. } => "schema_refresh",
            PipelineEvent::AiResponse { .. } => "ai_response",
            PipelineEvent::OperationCancelled { .. } => "operation_cancelled",
            PipelineEvent::Error { .. } => "error",
        }
    }

    /// JSON followed by [`MESSAGE_DELIMITER`]
    pub fn to_frame(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "type": "error", "message": e.to_string() }).to_string()
        });
        format!("{}{}", json, MESSAGE_DELIMITER)
    }
}

/// Sending half of a turn's event stream
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<PipelineEvent>,
}

impl EventSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Fails once the receiver is gone, which ends the turn
    pub async fn send(&self, event: PipelineEvent) -> Result<(), PipelineError> {
        log::debug!("Emitting {} event", event.kind());
        self.tx
            .send(event)
            .await
            .map_err(|_| PipelineError::StreamClosed)
    }
}
