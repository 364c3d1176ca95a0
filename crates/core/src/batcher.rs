use crate::embeddings::EmbeddingProvider;
use crate::error::{BatchEmbeddingError, ConfigError, ProviderError};
use crate::models::{Chunk, EmbeddingVector, DEFAULT_BATCH_SIZE};
use tracing::debug;

/// Feeds chunks to a provider in contiguous, sequential batches.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddingBatcher {
    batch_size: usize,
}

impl Default for EmbeddingBatcher {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl EmbeddingBatcher {
    pub fn new(batch_size: usize) -> Result<Self, ConfigError> {
        if batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        Ok(Self { batch_size })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Returns one vector per chunk, aligned index-for-index. The first failing
    /// batch aborts the whole document.
    pub async fn embed_batched<P>(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        provider: &P,
    ) -> Result<Vec<EmbeddingVector>, BatchEmbeddingError>
    where
        P: EmbeddingProvider + ?Sized,
    {
        let mut vectors = Vec::with_capacity(chunks.len());

        for (batch_number, batch) in chunks.chunks(self.batch_size).enumerate() {
            let batch_start = batch_number * self.batch_size;
            let fail = |source: ProviderError| BatchEmbeddingError {
                document_id: document_id.to_string(),
                batch_start,
                source,
            };

            debug!(
                document = document_id,
                batch_start,
                batch_len = batch.len(),
                provider = provider.name(),
                "embedding batch"
            );

            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let embedded = provider.embed(&texts).await.map_err(fail)?;

            if embedded.len() != batch.len() {
                return Err(fail(ProviderError::CountMismatch {
                    expected: batch.len(),
                    actual: embedded.len(),
                }));
            }

            let dimension = provider.dimension();
            if let Some(bad) = embedded.iter().find(|vector| vector.len() != dimension) {
                return Err(fail(ProviderError::DimensionMismatch {
                    expected: dimension,
                    actual: bad.len(),
                }));
            }

            vectors.extend(embedded);
        }

        if vectors.len() != chunks.len() {
            return Err(BatchEmbeddingError {
                document_id: document_id.to_string(),
                batch_start: 0,
                source: ProviderError::CountMismatch {
                    expected: chunks.len(),
                    actual: vectors.len(),
                },
            });
        }

        Ok(vectors)
    }
}
