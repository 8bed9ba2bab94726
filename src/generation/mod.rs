pub mod gemini;

use crate::errors::AppResult;
use async_trait::async_trait;

pub use gemini::GeminiClient;

/// One outbound call to a text generator.
///
/// Implementations return the raw text payload. A non-success response or a
/// missing payload is an error, never an empty string.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    fn model_id(&self) -> &str;

    async fn generate(&self, prompt: &str) -> AppResult<String>;
}
