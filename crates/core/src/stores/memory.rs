use crate::error::StorageError;
use crate::models::{ChunkMetadata, EmbeddingVector, QueryMatch};
use crate::store::{ensure_aligned, ensure_dimension, validate_index_name, VectorStore};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Process-local store. Clones share the same indexes, so a test can hand one
/// clone to a pipeline and inspect another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    indexes: Arc<RwLock<HashMap<String, MemoryIndex>>>,
}

#[derive(Debug)]
struct MemoryIndex {
    dimension: usize,
    records: BTreeMap<String, (EmbeddingVector, ChunkMetadata)>,
}

impl InMemoryStore {
    pub async fn ids(&self, index: &str) -> Vec<String> {
        self.indexes
            .read()
            .await
            .get(index)
            .map(|found| found.records.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn metadata(&self, index: &str, id: &str) -> Option<ChunkMetadata> {
        self.indexes
            .read()
            .await
            .get(index)
            .and_then(|found| found.records.get(id))
            .map(|(_, metadata)| metadata.clone())
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn create_index(&self, name: &str, dimension: usize) -> Result<(), StorageError> {
        validate_index_name(name)?;
        let mut indexes = self.indexes.write().await;

        if let Some(existing) = indexes.get(name) {
            if existing.dimension != dimension {
                return Err(StorageError::DimensionConflict {
                    index: name.to_string(),
                    existing: existing.dimension,
                    requested: dimension,
                });
            }
            return Ok(());
        }

        indexes.insert(
            name.to_string(),
            MemoryIndex {
                dimension,
                records: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn drop_index(&self, name: &str) -> Result<(), StorageError> {
        self.indexes.write().await.remove(name);
        Ok(())
    }

    async fn index_dimension(&self, name: &str) -> Result<Option<usize>, StorageError> {
        Ok(self
            .indexes
            .read()
            .await
            .get(name)
            .map(|found| found.dimension))
    }

    async fn upsert(
        &self,
        index: &str,
        ids: &[String],
        vectors: &[EmbeddingVector],
        metadata: &[ChunkMetadata],
    ) -> Result<(), StorageError> {
        ensure_aligned(ids, vectors, metadata)?;

        let mut indexes = self.indexes.write().await;
        let target = indexes
            .get_mut(index)
            .ok_or_else(|| StorageError::IndexNotFound(index.to_string()))?;
        ensure_dimension(index, target.dimension, vectors)?;

        for ((id, vector), meta) in ids.iter().zip(vectors).zip(metadata) {
            target
                .records
                .insert(id.clone(), (vector.clone(), meta.clone()));
        }
        Ok(())
    }

    async fn query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryMatch>, StorageError> {
        let indexes = self.indexes.read().await;
        let target = indexes
            .get(index)
            .ok_or_else(|| StorageError::IndexNotFound(index.to_string()))?;
        if vector.len() != target.dimension {
            return Err(StorageError::DimensionMismatch {
                index: index.to_string(),
                expected: target.dimension,
                actual: vector.len(),
            });
        }

        let mut matches: Vec<QueryMatch> = target
            .records
            .iter()
            .map(|(id, (stored, metadata))| QueryMatch {
                id: id.clone(),
                score: cosine_similarity(vector, stored),
                metadata: metadata.clone(),
            })
            .collect();

        matches.sort_by(|left, right| right.score.total_cmp(&left.score));
        matches.truncate(top_k);
        Ok(matches)
    }
}

fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    let mut dot = 0f64;
    let mut left_norm = 0f64;
    let mut right_norm = 0f64;
    for (a, b) in left.iter().zip(right) {
        dot += f64::from(*a) * f64::from(*b);
        left_norm += f64::from(*a) * f64::from(*a);
        right_norm += f64::from(*b) * f64::from(*b);
    }
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(index: usize) -> ChunkMetadata {
        ChunkMetadata {
            text: format!("chunk {index}"),
            source: "1977.pdf".to_string(),
            document_id: "1977.pdf".to_string(),
            year: Some("1977".to_string()),
            chunk_index: index,
            checksum: "c".to_string(),
            ingested_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn create_index_is_idempotent_for_same_dimension() {
        let store = InMemoryStore::default();
        store.create_index("letters", 768).await.unwrap();
        store.create_index("letters", 768).await.unwrap();

        let conflict = store.create_index("letters", 1536).await;
        assert!(matches!(
            conflict,
            Err(StorageError::DimensionConflict {
                existing: 768,
                requested: 1536,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn drop_of_missing_index_is_a_noop() {
        let store = InMemoryStore::default();
        store.drop_index("nothing-here").await.unwrap();
        assert_eq!(store.index_dimension("nothing-here").await.unwrap(), None);
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_ids() {
        let store = InMemoryStore::default();
        store.create_index("letters", 2).await.unwrap();
        let ids = vec!["a-chunk-0".to_string(), "a-chunk-1".to_string()];

        store
            .upsert("letters", &ids, &[vec![1.0, 0.0], vec![0.0, 1.0]], &[metadata(0), metadata(1)])
            .await
            .unwrap();
        store
            .upsert("letters", &ids[..1], &[vec![0.5, 0.5]], &[metadata(7)])
            .await
            .unwrap();

        assert_eq!(store.ids("letters").await, ids);
        let overwritten = store.metadata("letters", "a-chunk-0").await.unwrap();
        assert_eq!(overwritten.chunk_index, 7);
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimension_and_missing_index() {
        let store = InMemoryStore::default();
        let missing = store
            .upsert("absent", &["x".to_string()], &[vec![1.0]], &[metadata(0)])
            .await;
        assert!(matches!(missing, Err(StorageError::IndexNotFound(_))));

        store.create_index("letters", 2).await.unwrap();
        let wrong = store
            .upsert("letters", &["x".to_string()], &[vec![1.0]], &[metadata(0)])
            .await;
        assert!(matches!(wrong, Err(StorageError::DimensionMismatch { .. })));
    }

    #[tokio::test]
    async fn query_ranks_by_cosine_similarity() {
        let store = InMemoryStore::default();
        store.create_index("letters", 2).await.unwrap();
        let ids = vec!["near".to_string(), "far".to_string(), "mid".to_string()];
        store
            .upsert(
                "letters",
                &ids,
                &[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
                &[metadata(0), metadata(1), metadata(2)],
            )
            .await
            .unwrap();

        let matches = store.query("letters", &[1.0, 0.1], 2).await.unwrap();

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, "near");
        assert_eq!(matches[1].id, "mid");
        assert!(matches[0].score > matches[1].score);
    }
}
