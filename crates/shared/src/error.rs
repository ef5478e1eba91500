//! Shared error types for REST access.

use serde::Deserialize;
use thiserror::Error;

/// Error body shapes the back-office API returns.
///
/// The Nest-style `{ "message": ... }` envelope is the common case; some
/// endpoints send `{ "error": ... }` or RFC7807 `detail`/`title` instead.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

/// Attempt to parse an API error body into a user-facing message.
/// Prefers `message` (joining arrays of validation messages), then `detail`,
/// `error` and finally `title`.
pub fn error_message_from_body(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok()?;

    match parsed.message {
        Some(serde_json::Value::String(msg)) if !msg.trim().is_empty() => return Some(msg),
        Some(serde_json::Value::Array(items)) => {
            let joined: Vec<String> = items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            if !joined.is_empty() {
                return Some(joined.join(", "));
            }
        }
        _ => {}
    }

    [parsed.detail, parsed.error, parsed.title]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
}

/// API error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
    /// No session, or the session was rejected (401/403).
    #[error("Unauthorized")]
    Unauthorized,
}

impl ApiError {
    /// Classify a non-success HTTP response.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => ApiError::Unauthorized,
            _ => ApiError::Http { status, body },
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    /// Message suitable for a toast.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Http { body, .. } => {
                error_message_from_body(body).unwrap_or_else(|| self.to_string())
            }
            other => other.to_string(),
        }
    }
}
