use crate::actors::messages::AppError;
use async_trait::async_trait;

/// Defines the public interface for an LLM (Large Language Model) actor.
///
/// This trait abstracts the specific implementation of the LLM, so the gates and the
/// insights route can run against the real chat-completions client or a test double.
#[async_trait]
pub trait LlmActor: Send + Sync + 'static {
    /// Generates a complete text response for `prompt`, optionally steered by a system prompt.
    async fn complete(
        &self,
        prompt: String,
        system_prompt: Option<String>,
    ) -> Result<String, AppError>;
}

/// Turns question text into a fixed-length vector.
///
/// Failures are not errors for callers: `None` means "embedding unavailable" and the
/// FAQ matcher is skipped.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync + 'static {
    async fn embed(&self, text: &str) -> Option<Vec<f32>>;
}
