//! The external text-generation collaborator.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// One call to the generator.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Upper bound for the whole call; exceeding it is a [`GenerationError::Timeout`].
    pub timeout: Duration,
}

/// Failure of a generation call. All variants are transient from the job's
/// point of view and flow into the retry policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("generation API returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("generation API returned no text")]
    EmptyResponse,
}

/// Opaque prompt-in, raw-text-out function.
///
/// Implementations make no promise about the shape of the returned text.
#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

#[async_trait::async_trait]
impl<T: TextGenerator + ?Sized> TextGenerator for Arc<T> {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        (**self).generate(request).await
    }
}
