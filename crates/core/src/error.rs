use crate::models::Stage;
use thiserror::Error;

/// Errors that make a whole run impossible. Raised before any document is
/// touched and never converted into a per-document outcome.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Chunking(#[from] ChunkingError),

    #[error("invalid batch size {0}: must be greater than zero")]
    InvalidBatchSize(usize),

    #[error("missing required setting: {0}")]
    MissingSetting(String),

    #[error("invalid setting {name}: {details}")]
    InvalidSetting { name: String, details: String },

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("index {0} does not exist; run setup first")]
    IndexMissing(String),

    #[error("index {index} stores {index_dimension}-dimensional vectors but provider {provider} produces {provider_dimension}")]
    DimensionMismatch {
        index: String,
        index_dimension: usize,
        provider: String,
        provider_dimension: usize,
    },

    #[error("documents folder not found: {0}")]
    DocumentsFolder(String),

    #[error("could not inspect index: {0}")]
    Storage(#[from] StorageError),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkingError {
    #[error("invalid chunking config: max_chars={max_chars} overlap_chars={overlap_chars} (need max_chars > 0 and overlap_chars < max_chars)")]
    InvalidConfig {
        max_chars: usize,
        overlap_chars: usize,
    },
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("multimodal OCR failed: {0}")]
    OcrFailed(String),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} returned {status}: {body}")]
    Response {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("provider returned {actual} embeddings for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("provider returned a {actual}-dimensional vector, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl ProviderError {
    /// Transient conditions worth another attempt: throttling, server errors,
    /// timeouts and refused connections.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http(error) => error.is_timeout() || error.is_connect(),
            ProviderError::Response { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// The provider broke its own contract rather than failing the request.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            ProviderError::CountMismatch { .. } | ProviderError::DimensionMismatch { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to {backend}: {details}")]
    Connection { backend: String, details: String },

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("index {index} already exists with dimension {existing}, requested {requested}")]
    DimensionConflict {
        index: String,
        existing: usize,
        requested: usize,
    },

    #[error("index {index} expects {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch {
        index: String,
        expected: usize,
        actual: usize,
    },

    #[error("upsert sequences are misaligned: {ids} ids, {vectors} vectors, {metadata} metadata")]
    Misaligned {
        ids: usize,
        vectors: usize,
        metadata: usize,
    },

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("invalid index name: {0:?}")]
    InvalidIndexName(String),

    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An embedding batch failed; the owning document is abandoned.
#[derive(Debug, Error)]
#[error("embedding batch starting at chunk {batch_start} of {document_id} failed: {source}")]
pub struct BatchEmbeddingError {
    pub document_id: String,
    pub batch_start: usize,
    #[source]
    pub source: ProviderError,
}

/// Everything that can go wrong below the per-document boundary.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("read error: {0}")]
    Read(#[from] std::io::Error),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Chunking(#[from] ChunkingError),

    #[error(transparent)]
    Embedding(#[from] BatchEmbeddingError),

    #[error("store error: {0}")]
    Storage(#[from] StorageError),
}

impl DocumentError {
    /// The last stage the document reached before failing.
    pub fn stage(&self) -> Stage {
        match self {
            DocumentError::Read(_) | DocumentError::Extraction(_) => Stage::Started,
            DocumentError::Chunking(_) => Stage::Extracted,
            DocumentError::Embedding(_) => Stage::Chunked,
            DocumentError::Storage(_) => Stage::Embedded,
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("store error: {0}")]
    Storage(#[from] StorageError),
}
