use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::application::EmbeddingProvider;
use crate::domain::DomainError;

const MOCK_DIMENSIONS: usize = 384;

/// Deterministic offline embeddings: the text hash seeds an RNG, so equal
/// inputs always produce equal vectors. Good enough for tests and for
/// running the index pipeline with no provider configured.
pub struct MockEmbeddingProvider {
    dimensions: usize,
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self {
            dimensions: MOCK_DIMENSIONS,
        }
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut rng = StdRng::seed_from_u64(hasher.finish());

        let mut vector: Vec<f32> = (0..self.dimensions)
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect();
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DomainError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
