use crate::error::StorageError;
use crate::models::{ChunkMetadata, EmbeddingVector, IngestionRecord, QueryMatch};
use async_trait::async_trait;
use tracing::{info, warn};

/// Key-addressed vector storage, one index per corpus.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Creates the index unless it already exists with the same dimension.
    async fn create_index(&self, name: &str, dimension: usize) -> Result<(), StorageError>;

    /// No-op when the index is absent.
    async fn drop_index(&self, name: &str) -> Result<(), StorageError>;

    /// Dimension of an existing index, `None` when it does not exist.
    async fn index_dimension(&self, name: &str) -> Result<Option<usize>, StorageError>;

    /// Inserts or overwrites by id. The three slices are positionally aligned.
    async fn upsert(
        &self,
        index: &str,
        ids: &[String],
        vectors: &[EmbeddingVector],
        metadata: &[ChunkMetadata],
    ) -> Result<(), StorageError>;

    async fn query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryMatch>, StorageError>;

    async fn upsert_records(
        &self,
        index: &str,
        records: &[IngestionRecord],
    ) -> Result<(), StorageError> {
        let ids: Vec<String> = records.iter().map(|record| record.id.clone()).collect();
        let vectors: Vec<EmbeddingVector> =
            records.iter().map(|record| record.vector.clone()).collect();
        let metadata: Vec<ChunkMetadata> =
            records.iter().map(|record| record.metadata.clone()).collect();
        self.upsert(index, &ids, &vectors, &metadata).await
    }
}

#[async_trait]
impl<T: VectorStore + ?Sized> VectorStore for Box<T> {
    fn backend(&self) -> &'static str {
        (**self).backend()
    }

    async fn create_index(&self, name: &str, dimension: usize) -> Result<(), StorageError> {
        (**self).create_index(name, dimension).await
    }

    async fn drop_index(&self, name: &str) -> Result<(), StorageError> {
        (**self).drop_index(name).await
    }

    async fn index_dimension(&self, name: &str) -> Result<Option<usize>, StorageError> {
        (**self).index_dimension(name).await
    }

    async fn upsert(
        &self,
        index: &str,
        ids: &[String],
        vectors: &[EmbeddingVector],
        metadata: &[ChunkMetadata],
    ) -> Result<(), StorageError> {
        (**self).upsert(index, ids, vectors, metadata).await
    }

    async fn query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryMatch>, StorageError> {
        (**self).query(index, vector, top_k).await
    }
}

pub(crate) fn ensure_aligned(
    ids: &[String],
    vectors: &[EmbeddingVector],
    metadata: &[ChunkMetadata],
) -> Result<(), StorageError> {
    if ids.len() != vectors.len() || ids.len() != metadata.len() {
        return Err(StorageError::Misaligned {
            ids: ids.len(),
            vectors: vectors.len(),
            metadata: metadata.len(),
        });
    }
    Ok(())
}

pub(crate) fn ensure_dimension(
    index: &str,
    expected: usize,
    vectors: &[EmbeddingVector],
) -> Result<(), StorageError> {
    if let Some(bad) = vectors.iter().find(|vector| vector.len() != expected) {
        return Err(StorageError::DimensionMismatch {
            index: index.to_string(),
            expected,
            actual: bad.len(),
        });
    }
    Ok(())
}

pub(crate) fn validate_index_name(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidIndexName(name.to_string()))
    }
}

#[derive(Debug)]
pub struct SetupOutcome {
    pub index: String,
    pub dimension: usize,
    pub dropped: bool,
    /// A drop that failed during `recreate`; setup carried on regardless.
    pub drop_error: Option<String>,
}

/// Creates `name` for `dimension`-wide vectors, optionally dropping it first.
///
/// A failing drop is logged and tolerated so setup stays re-runnable; it can
/// hide a broken connection, in which case the following create fails anyway.
pub async fn prepare_index<S>(
    store: &S,
    name: &str,
    dimension: usize,
    recreate: bool,
) -> Result<SetupOutcome, StorageError>
where
    S: VectorStore + ?Sized,
{
    let mut dropped = false;
    let mut drop_error = None;

    if recreate {
        match store.drop_index(name).await {
            Ok(()) => {
                dropped = true;
                info!(index = name, backend = store.backend(), "dropped index");
            }
            Err(error) => {
                warn!(index = name, backend = store.backend(), %error, "drop index failed; continuing");
                drop_error = Some(error.to_string());
            }
        }
    }

    store.create_index(name, dimension).await?;
    info!(index = name, dimension, backend = store.backend(), "index ready");

    Ok(SetupOutcome {
        index: name.to_string(),
        dimension,
        dropped,
        drop_error,
    })
}
