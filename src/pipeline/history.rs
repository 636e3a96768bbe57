use serde_json::Value;

use crate::llm::ChatMessage;

/// One past exchange: what was asked and the SQL it produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub question: String,
    pub sql: String,
}

/// Read-only record of earlier turns in a conversation.
///
/// Collaborators receive it by reference and cannot change it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationLog {
    turns: Vec<Turn>,
}

impl ConversationLog {
    /// Pair earlier questions with earlier results.
    ///
    /// `chat` holds every question including the current (last) one; `results`
    /// holds one entry per earlier question. Unpaired entries are ignored.
    pub fn from_history(chat: &[String], results: &[Value]) -> Self {
        let earlier = chat.len().saturating_sub(1);
        let turns = chat[..earlier]
            .iter()
            .zip(results)
            .map(|(question, result)| Turn {
                question: question.clone(),
                sql: match result {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                },
            })
            .collect();
        Self { turns }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn questions(&self) -> Vec<&str> {
        self.turns.iter().map(|t| t.question.as_str()).collect()
    }

    /// Alternating user/assistant messages, oldest first
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.turns
            .iter()
            .flat_map(|t| {
                [
                    ChatMessage::user(t.question.as_str()),
                    ChatMessage::assistant(t.sql.as_str()),
                ]
            })
            .collect()
    }

    /// Plain-text transcript for prompts that embed history inline
    pub fn transcript(&self) -> String {
        self.turns
            .iter()
            .map(|t| format!("user: {}\nassistant: {}", t.question, t.sql))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
