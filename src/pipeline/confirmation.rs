//! Pending destructive statements awaiting a confirm/cancel call

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConfirmation {
    pub sql_query: String,
    pub operation_type: String,
    pub graph_id: String,
    pub created_at: DateTime<Utc>,
}

impl PendingConfirmation {
    pub fn new(
        graph_id: impl Into<String>,
        sql_query: impl Into<String>,
        operation_type: impl Into<String>,
    ) -> Self {
        Self {
            sql_query: sql_query.into(),
            operation_type: operation_type.into(),
            graph_id: graph_id.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfirmationError {
    #[error("No confirmation token supplied")]
    MissingToken,
    #[error("Unknown or already used confirmation token")]
    UnknownToken,
    #[error("Confirmation token belongs to graph '{expected}', not '{actual}'")]
    GraphMismatch { expected: String, actual: String },
    #[error("Confirmed SQL does not match the statement awaiting confirmation")]
    StatementMismatch,
}

/// Bounded, in-process store of pending confirmations keyed by random token
#[derive(Debug)]
pub struct ConfirmationStore {
    capacity: usize,
    pending: Mutex<HashMap<String, PendingConfirmation>>,
}

impl ConfirmationStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Park a statement and return its token; evicts the oldest entry when full
    pub async fn insert(&self, confirmation: PendingConfirmation) -> String {
        let token = Uuid::new_v4().to_string();
        let mut pending = self.pending.lock().await;

        while pending.len() >= self.capacity {
            let oldest = pending
                .iter()
                .min_by_key(|(_, p)| p.created_at)
                .map(|(token, _)| token.clone());
            match oldest {
                Some(oldest) => {
                    log::warn!("Confirmation store full, evicting pending statement {}", oldest);
                    pending.remove(&oldest);
                }
                None => break,
            }
        }

        pending.insert(token.clone(), confirmation);
        token
    }

    /// Remove and return the statement for `token`.
    ///
    /// The token is spent even when it was presented for the wrong graph.
    pub async fn take(
        &self,
        token: &str,
        graph_id: &str,
    ) -> Result<PendingConfirmation, ConfirmationError> {
        let pending = self
            .pending
            .lock()
            .await
            .remove(token)
            .ok_or(ConfirmationError::UnknownToken)?;

        if pending.graph_id != graph_id {
            return Err(ConfirmationError::GraphMismatch {
                expected: pending.graph_id,
                actual: graph_id.to_string(),
            });
        }
        Ok(pending)
    }

    pub async fn discard(&self, token: &str) -> bool {
        self.pending.lock().await.remove(token).is_some()
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }
}
