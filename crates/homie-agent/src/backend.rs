use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::tools::ToolDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendRole {
    Default,
    Fast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendMessage {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// What `TurnEngine` passes to a backend for one completion. The backend
/// owns any internal agentic tool loop; `steps` in the result reports how
/// many round trips it took.
#[derive(Debug, Clone)]
pub struct CompletionParams {
    pub role: BackendRole,
    pub system: String,
    pub max_steps: u32,
    pub messages: Vec<BackendMessage>,
    pub tools: Vec<ToolDefinition>,
    pub cancellation: Option<CancellationToken>,
}

#[derive(Debug, Clone)]
pub struct CompletionResult {
    pub text: String,
    pub steps: u32,
    pub usage: Option<Usage>,
    pub model_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("transient backend error: {0}")]
    TransientBackend(String),

    #[error("context length exceeded")]
    ContextOverflow,

    #[error("backend returned unparseable output: {0}")]
    BackendParse(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("turn cancelled")]
    Cancelled,
}

/// Substrings a real provider's error body uses to report that the
/// request exceeded its context window. Backends translate their own
/// provider-specific errors into `BackendError::ContextOverflow` by
/// matching against these (or their own equivalent check); kept here so
/// `TurnEngine`'s retry logic and any backend agree on the signal.
pub const CONTEXT_OVERFLOW_MARKERS: &[&str] = &[
    "context_length_exceeded",
    "maximum context length",
    "too many tokens",
    "prompt is too long",
];

pub fn looks_like_context_overflow(message: &str) -> bool {
    let lower = message.to_lowercase();
    CONTEXT_OVERFLOW_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// The narrow contract `TurnEngine` drives. Concrete backends (HTTP APIs,
/// CLI-wrapped processes) implement this and own their own retry/auth.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn complete(&self, params: CompletionParams) -> Result<CompletionResult, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_known_overflow_phrasings() {
        assert!(looks_like_context_overflow("Error: context_length_exceeded"));
        assert!(looks_like_context_overflow("Your prompt is too long for this model"));
        assert!(!looks_like_context_overflow("rate limited, try again"));
    }
}
