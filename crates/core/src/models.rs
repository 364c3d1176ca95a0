use crate::chunking::ChunkingConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_CHUNK_SIZE: usize = 800;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;
pub const DEFAULT_BATCH_SIZE: usize = 100;

pub type EmbeddingVector = Vec<f32>;

/// A file discovered for ingestion. `document_id` is stable across runs and
/// prefixes every chunk id derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub document_id: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Document {
    pub document_id: String,
    pub title: String,
    pub source_path: String,
    pub year: Option<String>,
    pub checksum: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    pub index: usize,
    pub text: String,
}

impl Chunk {
    pub fn id(&self) -> String {
        chunk_id(&self.document_id, self.index)
    }
}

pub fn chunk_id(document_id: &str, index: usize) -> String {
    format!("{document_id}-chunk-{index}")
}

/// Payload stored next to every vector; enough to cite the passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub text: String,
    pub source: String,
    pub document_id: String,
    pub year: Option<String>,
    pub chunk_index: usize,
    pub checksum: String,
    pub ingested_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestionRecord {
    pub id: String,
    pub vector: EmbeddingVector,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    pub id: String,
    pub score: f64,
    pub metadata: ChunkMetadata,
}

/// Per-document progress, in the order a document moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    Started,
    Extracted,
    Chunked,
    Embedded,
    Stored,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Started => "started",
            Stage::Extracted => "extracted",
            Stage::Chunked => "chunked",
            Stage::Embedded => "embedded",
            Stage::Stored => "stored",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub index_name: String,
    pub chunking: ChunkingConfig,
    pub batch_size: usize,
}

impl IngestionOptions {
    pub fn new(index_name: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
            chunking: ChunkingConfig::default(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}
