//! LlmProvider trait definition.
//!
//! The bot treats the language model as a black box that turns a system
//! prompt, prior turns and a new prompt into text. Uses RPITIT for
//! `generate`; [`super::box_provider::BoxLlmProvider`] erases the type.

use skylark_types::llm::{GenerateRequest, LlmError};

/// Trait for text-generation backends.
///
/// Implementations live in skylark-infra (e.g. `OpenAiProvider`).
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name (e.g. "openai").
    fn name(&self) -> &str;

    /// The model used when a request does not name one.
    fn default_model(&self) -> &str;

    /// Generate a reply. Implementations bound the call with a timeout and
    /// report it as [`LlmError::Timeout`].
    fn generate(
        &self,
        request: &GenerateRequest,
    ) -> impl std::future::Future<Output = Result<String, LlmError>> + Send;
}
