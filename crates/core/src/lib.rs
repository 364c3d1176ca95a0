pub mod agent;
pub mod batcher;
pub mod chat;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod providers;
pub mod store;
pub mod stores;

#[cfg(test)]
pub(crate) mod test_support;

pub use agent::{
    render_context, retrieve_matches, AgentOptions, Answer, Citation, RetrievalAgent, DEFAULT_TOP_K,
};
pub use batcher::EmbeddingBatcher;
pub use chat::{ChatModel, ChatRequest};
pub use chunking::{chunk_document, chunk_text, normalize_extracted_text, ChunkingConfig};
pub use embeddings::{CharacterNgramEmbedder, EmbeddingProvider, DEFAULT_LOCAL_DIMENSIONS};
pub use error::{
    AgentError, BatchEmbeddingError, ChunkingError, ConfigError, DocumentError, ExtractionError,
    ProviderError, StorageError,
};
pub use extractor::{LopdfExtractor, OcrEndpointConfig, OcrFallbackExtractor, TextExtractor};
pub use ingest::{
    discover_documents, discover_pdf_files, extract_year, DocumentOutcome, DocumentStatus,
    FailedDocument, IngestionPipeline, IngestionReport, SkipReason, SkippedDocument,
    StoredDocument,
};
pub use models::{
    chunk_id, Chunk, ChunkMetadata, Document, EmbeddingVector, IngestionOptions, IngestionRecord,
    QueryMatch, SourceDocument, Stage, DEFAULT_BATCH_SIZE, DEFAULT_CHUNK_OVERLAP,
    DEFAULT_CHUNK_SIZE,
};
pub use providers::{
    build_chat_model, build_embedding_provider, EmbeddingProviderKind, ProviderSettings,
    RetryPolicy,
};
pub use store::{prepare_index, SetupOutcome, VectorStore};
pub use stores::{InMemoryStore, PgVectorStore, QdrantStore};
