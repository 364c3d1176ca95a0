use crate::error::StorageError;
use crate::models::{ChunkMetadata, EmbeddingVector, QueryMatch};
use crate::store::{ensure_aligned, ensure_dimension, validate_index_name, VectorStore};
use async_trait::async_trait;
use pgvector::Vector;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::time::Duration;

const BACKEND: &str = "pgvector";

/// Declared dimension of an index table's `embedding` column, looked up by
/// table name in the current schema. For vector columns the type modifier is
/// the dimension.
const INDEX_DIMENSION_SQL: &str = "SELECT a.atttypmod
     FROM pg_attribute a
     JOIN pg_class c ON c.oid = a.attrelid
     JOIN pg_namespace n ON n.oid = c.relnamespace
     WHERE c.relname = $1
       AND n.nspname = current_schema()
       AND a.attname = 'embedding'
       AND NOT a.attisdropped";

/// One table per index: `id TEXT PRIMARY KEY, embedding vector(d), metadata JSONB`.
pub struct PgVectorStore {
    pool: PgPool,
}

impl PgVectorStore {
    pub async fn connect(connection_string: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect(connection_string)
            .await
            .map_err(|error| StorageError::Connection {
                backend: BACKEND.to_string(),
                details: error.to_string(),
            })?;

        Ok(Self { pool })
    }

    async fn ensure_extension(&self) -> Result<(), StorageError> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
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

        self.ensure_extension().await?;

        let table = quote_ident(name);
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                embedding vector({dimension}) NOT NULL,
                metadata JSONB NOT NULL
            )"
        );
        sqlx::query(&ddl).execute(&self.pool).await?;

        let index_sql = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {table} USING hnsw (embedding vector_cosine_ops)",
            quote_ident(&format!("{name}_embedding_idx"))
        );
        sqlx::query(&index_sql).execute(&self.pool).await?;

        Ok(())
    }

    async fn drop_index(&self, name: &str) -> Result<(), StorageError> {
        validate_index_name(name)?;
        let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(name));
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn index_dimension(&self, name: &str) -> Result<Option<usize>, StorageError> {
        validate_index_name(name)?;

        let row: Option<(i32,)> = sqlx::query_as(INDEX_DIMENSION_SQL)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|(typmod,)| usize::try_from(typmod).ok()))
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

        let dimension = self
            .index_dimension(index)
            .await?
            .ok_or_else(|| StorageError::IndexNotFound(index.to_string()))?;
        ensure_dimension(index, dimension, vectors)?;

        let sql = format!(
            "INSERT INTO {} (id, embedding, metadata) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET
                embedding = EXCLUDED.embedding,
                metadata = EXCLUDED.metadata",
            quote_ident(index)
        );

        let mut tx = self.pool.begin().await?;
        for ((id, vector), meta) in ids.iter().zip(vectors).zip(metadata) {
            sqlx::query(&sql)
                .bind(id)
                .bind(Vector::from(vector.clone()))
                .bind(Json(meta))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryMatch>, StorageError> {
        validate_index_name(index)?;

        let sql = format!(
            "SELECT id, 1 - (embedding <=> $1) AS score, metadata
             FROM {}
             ORDER BY embedding <=> $1
             LIMIT $2",
            quote_ident(index)
        );

        let limit = i64::try_from(top_k).unwrap_or(i64::MAX);
        let rows = sqlx::query(&sql)
            .bind(Vector::from(vector.to_vec()))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(row_to_match).collect()
    }
}

fn row_to_match(row: PgRow) -> Result<QueryMatch, StorageError> {
    let id: String = row.try_get("id")?;
    let score: f64 = row.try_get("score")?;
    let Json(metadata): Json<ChunkMetadata> = row.try_get("metadata")?;
    Ok(QueryMatch {
        id,
        score,
        metadata,
    })
}

/// Quotes a Postgres identifier, escaping embedded quotes.
fn quote_ident(input: &str) -> String {
    format!("\"{}\"", input.replace('"', "\"\""))
}
