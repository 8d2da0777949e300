//! Language-model request types and errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation::Turn;

/// Which request shape the OpenAI-compatible backend speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiMode {
    /// Probe the Responses API, fall back to chat-completions if unsupported.
    #[default]
    Auto,
    Chat,
    Responses,
}

impl ApiMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Some(ApiMode::Auto),
            "chat" => Some(ApiMode::Chat),
            "responses" => Some(ApiMode::Responses),
            _ => None,
        }
    }
}

/// A single generation call: system prompt, prior turns and the new prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateRequest {
    pub system: Option<String>,
    pub history: Vec<Turn>,
    pub prompt: String,
    /// Image URLs attached to the prompt.
    pub images: Vec<String>,
    /// Overrides the provider's configured model when set.
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: 1000,
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        let system = system.into();
        self.system = if system.trim().is_empty() {
            None
        } else {
            Some(system)
        };
        self
    }

    pub fn with_history(mut self, history: Vec<Turn>) -> Self {
        self.history = history;
        self
    }
}

/// Errors from LLM backends.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider error: {message}")]
    Provider { message: String },

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("provider overloaded: {0}")]
    Overloaded(String),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The endpoint does not exist on this backend (HTTP 404/405).
    #[error("endpoint not supported: {0}")]
    Unsupported(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("model returned an empty response")]
    EmptyResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_mode_parse() {
        assert_eq!(ApiMode::parse("AUTO"), Some(ApiMode::Auto));
        assert_eq!(ApiMode::parse("responses"), Some(ApiMode::Responses));
        assert_eq!(ApiMode::parse("legacy"), None);
    }

    #[test]
    fn blank_system_prompt_is_dropped() {
        let req = GenerateRequest::new("hi").with_system("   ");
        assert!(req.system.is_none());
        assert_eq!(req.max_tokens, 1000);
    }

    #[test]
    fn llm_error_display() {
        assert_eq!(LlmError::Timeout(120).to_string(), "request timed out after 120s");
    }
}
