use crate::error::ProviderError;
use crate::models::EmbeddingVector;
use async_trait::async_trait;

pub const DEFAULT_LOCAL_DIMENSIONS: usize = 128;

/// Turns texts into vectors. Output is order-preserving and the same length as
/// the input; every vector has `dimension()` components.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, ProviderError>;
}

#[async_trait]
impl<T: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, ProviderError> {
        (**self).embed(texts).await
    }
}

/// Offline embedder: hashed character trigrams, L2-normalised. Deterministic,
/// needs no network, and is good enough for smoke runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_LOCAL_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> EmbeddingVector {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingProvider for CharacterNgramEmbedder {
    fn name(&self) -> &str {
        "local"
    }

    fn dimension(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, ProviderError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}
