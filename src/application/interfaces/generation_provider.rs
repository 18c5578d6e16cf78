use async_trait::async_trait;

use crate::domain::DomainError;

/// External capability: generate text from a prompt plus retrieved context.
///
/// Same failure taxonomy as [`super::EmbeddingProvider`]: `Transient` means
/// the caller should degrade gracefully and retry lazily on the next call.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, prompt: &str, context: &[String]) -> Result<String, DomainError>;
}
