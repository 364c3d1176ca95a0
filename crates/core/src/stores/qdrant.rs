use crate::error::StorageError;
use crate::models::{ChunkMetadata, EmbeddingVector, QueryMatch};
use crate::store::{ensure_aligned, ensure_dimension, validate_index_name, VectorStore};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use url::Url;
use uuid::Uuid;

const BACKEND: &str = "qdrant";

/// Qdrant over its REST API; each index is a collection with cosine distance.
///
/// Qdrant only accepts integer or UUID point ids, so the chunk id is mapped to
/// a UUIDv5 and kept verbatim in the payload under `chunk_id`.
pub struct QdrantStore {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
}

impl QdrantStore {
    pub fn new(endpoint: &str, api_key: Option<String>) -> Result<Self, url::ParseError> {
        let parsed = Url::parse(endpoint)?;
        Ok(Self {
            endpoint: parsed.as_str().trim_end_matches('/').to_string(),
            api_key,
            client: Client::new(),
        })
    }

    fn collection_url(&self, name: &str) -> String {
        format!("{}/collections/{}", self.endpoint, name)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    fn point_id(chunk_id: &str) -> String {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
    }
}

fn backend_error(details: impl Into<String>) -> StorageError {
    StorageError::BackendResponse {
        backend: BACKEND.to_string(),
        details: details.into(),
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn create_index(&self, name: &str, dimension: usize) -> Result<(), StorageError> {
        validate_index_name(name)?;

        if let Some(existing) = self.index_dimension(name).await? {
            if existing != dimension {
                return Err(StorageError::DimensionConflict {
                    index: name.to_string(),
                    existing,
                    requested: dimension,
                });
            }
            return Ok(());
        }

        let response = self
            .authorize(self.client.put(self.collection_url(name)))
            .json(&json!({
                "vectors": { "size": dimension, "distance": "Cosine" }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status().to_string()));
        }
        Ok(())
    }

    async fn drop_index(&self, name: &str) -> Result<(), StorageError> {
        validate_index_name(name)?;
        let response = self
            .authorize(self.client.delete(self.collection_url(name)))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND || response.status().is_success() {
            return Ok(());
        }
        Err(backend_error(response.status().to_string()))
    }

    async fn index_dimension(&self, name: &str) -> Result<Option<usize>, StorageError> {
        validate_index_name(name)?;
        let response = self
            .authorize(self.client.get(self.collection_url(name)))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(backend_error(response.status().to_string()));
        }

        let parsed: Value = response.json().await?;
        let size = parsed
            .pointer("/result/config/params/vectors/size")
            .and_then(Value::as_u64)
            .ok_or_else(|| backend_error(format!("collection {name} has no single vector size")))?;

        Ok(Some(size as usize))
    }

    async fn upsert(
        &self,
        index: &str,
        ids: &[String],
        vectors: &[EmbeddingVector],
        metadata: &[ChunkMetadata],
    ) -> Result<(), StorageError> {
        validate_index_name(index)?;
        ensure_aligned(ids, vectors, metadata)?;
        if ids.is_empty() {
            return Ok(());
        }
        if let Some(dimension) = self.index_dimension(index).await? {
            ensure_dimension(index, dimension, vectors)?;
        } else {
            return Err(StorageError::IndexNotFound(index.to_string()));
        }

        let points = ids
            .iter()
            .zip(vectors)
            .zip(metadata)
            .map(|((id, vector), meta)| {
                let mut payload = serde_json::to_value(meta)?;
                if let Value::Object(fields) = &mut payload {
                    fields.insert("chunk_id".to_string(), Value::String(id.clone()));
                }
                Ok(json!({
                    "id": Self::point_id(id),
                    "vector": vector,
                    "payload": payload,
                }))
            })
            .collect::<Result<Vec<_>, StorageError>>()?;

        let response = self
            .authorize(
                self.client
                    .put(format!("{}/points?wait=true", self.collection_url(index))),
            )
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status().to_string()));
        }

        Ok(())
    }

    async fn query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryMatch>, StorageError> {
        validate_index_name(index)?;
        let response = self
            .authorize(
                self.client
                    .post(format!("{}/points/search", self.collection_url(index))),
            )
            .json(&json!({
                "vector": vector,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StorageError::IndexNotFound(index.to_string()));
        }
        if !response.status().is_success() {
            return Err(backend_error(response.status().to_string()));
        }

        let parsed: Value = response.json().await?;
        parse_search_hits(&parsed)
    }
}

fn parse_search_hits(parsed: &Value) -> Result<Vec<QueryMatch>, StorageError> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .ok_or_else(|| backend_error("search response has no result array"))?;

    hits.iter()
        .map(|hit| {
            let payload = hit
                .pointer("/payload")
                .cloned()
                .ok_or_else(|| backend_error("search hit without payload"))?;
            let id = payload
                .pointer("/chunk_id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| backend_error("search hit without chunk_id"))?;
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
            let metadata: ChunkMetadata = serde_json::from_value(payload)?;

            Ok(QueryMatch {
                id,
                score,
                metadata,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ids_are_stable_uuids() {
        let first = QdrantStore::point_id("1977.pdf-chunk-0");
        let second = QdrantStore::point_id("1977.pdf-chunk-0");
        let other = QdrantStore::point_id("1977.pdf-chunk-1");

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn endpoint_is_validated_and_trimmed() {
        let store = QdrantStore::new("http://localhost:6333/", None).unwrap();
        assert_eq!(
            store.collection_url("letters"),
            "http://localhost:6333/collections/letters"
        );
        assert!(QdrantStore::new("not a url", None).is_err());
    }

    #[test]
    fn search_hits_are_parsed_from_payload() {
        let response = json!({
            "result": [{
                "id": "3f1c0c1e-0000-5000-8000-000000000000",
                "score": 0.87,
                "payload": {
                    "chunk_id": "1984.pdf-chunk-2",
                    "text": "Float is money we hold but do not own.",
                    "source": "1984.pdf",
                    "document_id": "1984.pdf",
                    "year": "1984",
                    "chunk_index": 2,
                    "checksum": "abc",
                    "ingested_at": "2024-01-01T00:00:00Z"
                }
            }]
        });

        let hits = parse_search_hits(&response).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "1984.pdf-chunk-2");
        assert_eq!(hits[0].metadata.year.as_deref(), Some("1984"));
        assert!((hits[0].score - 0.87).abs() < 1e-9);
    }

    #[test]
    fn malformed_search_response_is_an_error() {
        assert!(parse_search_hits(&json!({ "status": "ok" })).is_err());
    }
}
