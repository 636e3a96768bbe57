//! Lenient JSON extraction from completion text.
//!
//! Models wrap JSON in prose or markdown fences; everything between the first
//! `{` and the last `}` is decoded.

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("Failed to parse response: {reason}")]
pub struct ResponseParseError {
    pub reason: String,
    /// The completion text exactly as received
    pub raw: String,
}

pub fn parse_json_response<T: DeserializeOwned>(response: &str) -> Result<T, ResponseParseError> {
    let fail = |reason: String| ResponseParseError {
        reason,
        raw: response.to_string(),
    };

    let start = response
        .find('{')
        .ok_or_else(|| fail("no JSON object in response".to_string()))?;
    let end = response
        .rfind('}')
        .filter(|&end| end > start)
        .ok_or_else(|| fail("unterminated JSON object in response".to_string()))?;

    serde_json::from_str(&response[start..=end]).map_err(|e| fail(e.to_string()))
}
