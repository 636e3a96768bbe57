use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pipeline::RefreshStatus;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    /// Questions so far; the last one is answered
    pub chat: Vec<String>,
    /// SQL produced for the earlier questions, aligned with `chat`
    #[serde(default)]
    pub result: Option<Vec<Value>>,
    /// Extra guidance for SQL generation
    #[serde(default)]
    pub instructions: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    /// `CONFIRM` runs the parked statement; anything else cancels it
    #[serde(default)]
    pub confirmation: String,
    /// Token from the `destructive_confirmation` event
    #[serde(default)]
    pub confirmation_token: Option<String>,
    #[serde(default)]
    pub sql_query: Option<String>,
    #[serde(default)]
    pub chat: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GraphListResponse {
    pub graphs: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub graph_id: String,
    pub refresh_status: RefreshStatus,
    pub message: String,
}
