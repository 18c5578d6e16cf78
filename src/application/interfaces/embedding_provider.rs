use async_trait::async_trait;

use crate::domain::DomainError;

/// External capability: turn texts into fixed-length vectors.
///
/// Implementations own their transport, timeout and retry policy; callers
/// must keep each request at or below `max_batch_size` texts. Failures are
/// reported through the standard taxonomy: `Transient` for network
/// trouble, `PermanentInput` for inputs the provider rejects outright.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DomainError>;

    fn dimensions(&self) -> usize;

    fn max_batch_size(&self) -> usize {
        25
    }
}
