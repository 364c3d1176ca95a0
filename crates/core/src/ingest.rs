use crate::batcher::EmbeddingBatcher;
use crate::chunking::{chunk_document, normalize_extracted_text};
use crate::embeddings::EmbeddingProvider;
use crate::error::{BatchEmbeddingError, ConfigError, DocumentError, ProviderError};
use crate::extractor::TextExtractor;
use crate::models::{
    ChunkMetadata, Document, IngestionOptions, IngestionRecord, SourceDocument, Stage,
};
use crate::store::VectorStore;
use chrono::{SecondsFormat, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::sync::watch;
use tracing::{error, info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// PDFs under `folder` with ids relative to it, so `documents/1977.pdf` becomes
/// `1977.pdf` and nested files keep their sub-path.
pub fn discover_documents(folder: &Path) -> Result<Vec<SourceDocument>, ConfigError> {
    if !folder.is_dir() {
        return Err(ConfigError::DocumentsFolder(folder.display().to_string()));
    }

    Ok(discover_pdf_files(folder)
        .into_iter()
        .map(|path| SourceDocument {
            document_id: document_id_for(folder, &path),
            path,
        })
        .collect())
}

fn document_id_for(folder: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(folder).unwrap_or(path);
    relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// First standalone `19xx`/`20xx` in a file name, e.g. `1987-letter.pdf`.
pub fn extract_year(name: &str) -> Option<String> {
    static YEAR: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = YEAR
        .get_or_init(|| Regex::new(r"(?:^|[^0-9])((?:19|20)[0-9]{2})(?:[^0-9]|$)").ok())
        .as_ref()?;

    pattern
        .captures(name)
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    EmptyFile,
    EmptyExtraction,
    NoChunks,
    EmbeddingCountMismatch {
        batch_start: usize,
        expected: usize,
        actual: usize,
    },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::EmptyFile => f.write_str("file is empty"),
            SkipReason::EmptyExtraction => f.write_str("no text could be extracted"),
            SkipReason::NoChunks => f.write_str("text produced no chunks"),
            SkipReason::EmbeddingCountMismatch {
                batch_start,
                expected,
                actual,
            } => write!(
                f,
                "provider returned {actual} embeddings for {expected} chunks in the batch starting at chunk {batch_start}"
            ),
        }
    }
}

#[derive(Debug)]
pub enum DocumentStatus {
    Stored { chunks: usize },
    Skipped { stage: Stage, reason: SkipReason },
    Failed { stage: Stage, error: DocumentError },
}

#[derive(Debug)]
pub struct DocumentOutcome {
    pub document_id: String,
    pub status: DocumentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub document_id: String,
    pub chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDocument {
    pub document_id: String,
    pub stage: Stage,
    pub reason: SkipReason,
}

#[derive(Debug)]
pub struct FailedDocument {
    pub document_id: String,
    pub stage: Stage,
    pub error: DocumentError,
}

/// What a run did, document by document. Documents after a cancellation are
/// listed in `not_started` and appear nowhere else.
#[derive(Debug, Default)]
pub struct IngestionReport {
    pub stored: Vec<StoredDocument>,
    pub skipped: Vec<SkippedDocument>,
    pub failed: Vec<FailedDocument>,
    pub cancelled: bool,
    pub not_started: Vec<String>,
}

impl IngestionReport {
    pub fn total_chunks(&self) -> usize {
        self.stored.iter().map(|document| document.chunks).sum()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn processed(&self) -> usize {
        self.stored.len() + self.skipped.len() + self.failed.len()
    }

    fn record(&mut self, outcome: DocumentOutcome) {
        let document_id = outcome.document_id;
        match outcome.status {
            DocumentStatus::Stored { chunks } => self.stored.push(StoredDocument {
                document_id,
                chunks,
            }),
            DocumentStatus::Skipped { stage, reason } => self.skipped.push(SkippedDocument {
                document_id,
                stage,
                reason,
            }),
            DocumentStatus::Failed { stage, error } => self.failed.push(FailedDocument {
                document_id,
                stage,
                error,
            }),
        }
    }
}

enum Progress {
    Stored(usize),
    Skipped(Stage, SkipReason),
}

/// Drives documents through extract, chunk, embed and store. One document at
/// a time; a failing document never stops the run.
pub struct IngestionPipeline<X, P, S> {
    extractor: X,
    provider: P,
    store: S,
    options: IngestionOptions,
    batcher: EmbeddingBatcher,
    cancel: Option<watch::Receiver<bool>>,
}

impl<X, P, S> IngestionPipeline<X, P, S>
where
    X: TextExtractor,
    P: EmbeddingProvider,
    S: VectorStore,
{
    pub fn new(
        extractor: X,
        provider: P,
        store: S,
        options: IngestionOptions,
    ) -> Result<Self, ConfigError> {
        options.chunking.validate()?;
        let batcher = EmbeddingBatcher::new(options.batch_size)?;

        Ok(Self {
            extractor,
            provider,
            store,
            options,
            batcher,
            cancel: None,
        })
    }

    /// Stops the run before the next document once the channel reads `true`.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// The index must exist and hold vectors as wide as the provider emits.
    pub async fn preflight(&self) -> Result<usize, ConfigError> {
        let index = &self.options.index_name;
        let provider_dimension = self.provider.dimension();

        match self.store.index_dimension(index).await? {
            None => Err(ConfigError::IndexMissing(index.clone())),
            Some(index_dimension) if index_dimension != provider_dimension => {
                Err(ConfigError::DimensionMismatch {
                    index: index.clone(),
                    index_dimension,
                    provider: self.provider.name().to_string(),
                    provider_dimension,
                })
            }
            Some(index_dimension) => Ok(index_dimension),
        }
    }

    pub async fn ingest_folder(&self, folder: &Path) -> Result<IngestionReport, ConfigError> {
        let documents = discover_documents(folder)?;
        if documents.is_empty() {
            warn!(folder = %folder.display(), "no pdf files found");
        }
        self.ingest_all(&documents).await
    }

    pub async fn ingest_all(
        &self,
        documents: &[SourceDocument],
    ) -> Result<IngestionReport, ConfigError> {
        let dimension = self.preflight().await?;
        info!(
            index = %self.options.index_name,
            backend = self.store.backend(),
            provider = self.provider.name(),
            dimension,
            documents = documents.len(),
            "starting ingestion"
        );

        let mut report = IngestionReport::default();
        for (position, document) in documents.iter().enumerate() {
            if self.is_cancelled() {
                report.cancelled = true;
                report.not_started = documents[position..]
                    .iter()
                    .map(|pending| pending.document_id.clone())
                    .collect();
                warn!(
                    remaining = report.not_started.len(),
                    "ingestion cancelled before next document"
                );
                break;
            }

            let outcome = self.ingest_document(document).await;
            report.record(outcome);
        }

        info!(
            stored = report.stored.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            chunks = report.total_chunks(),
            cancelled = report.cancelled,
            "ingestion finished"
        );
        Ok(report)
    }

    /// Runs one document to a terminal state. Never returns an error; failures
    /// are carried in the outcome.
    pub async fn ingest_document(&self, source: &SourceDocument) -> DocumentOutcome {
        let status = match self.process(source).await {
            Ok(Progress::Stored(chunks)) => DocumentStatus::Stored { chunks },
            Ok(Progress::Skipped(stage, reason)) => {
                warn!(document = %source.document_id, %stage, %reason, "document skipped");
                DocumentStatus::Skipped { stage, reason }
            }
            Err(failure) => {
                let stage = failure.stage();
                error!(document = %source.document_id, %stage, error = %failure, "document failed");
                DocumentStatus::Failed {
                    stage,
                    error: failure,
                }
            }
        };

        DocumentOutcome {
            document_id: source.document_id.clone(),
            status,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|receiver| *receiver.borrow())
    }

    async fn process(&self, source: &SourceDocument) -> Result<Progress, DocumentError> {
        let document_id = source.document_id.as_str();
        info!(document = document_id, stage = %Stage::Started, path = %source.path.display(), "reading document");

        let bytes = tokio::fs::read(&source.path).await?;
        if bytes.is_empty() {
            return Ok(Progress::Skipped(Stage::Started, SkipReason::EmptyFile));
        }

        let title = source
            .path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| document_id.to_string());

        let raw = self.extractor.extract_text(&title, &bytes).await?;
        let text = normalize_extracted_text(&raw);
        if text.is_empty() {
            return Ok(Progress::Skipped(
                Stage::Extracted,
                SkipReason::EmptyExtraction,
            ));
        }
        info!(document = document_id, stage = %Stage::Extracted, chars = text.chars().count(), "text extracted");

        let document = Document {
            document_id: document_id.to_string(),
            year: extract_year(&title),
            title,
            source_path: source.path.to_string_lossy().to_string(),
            checksum: digest_bytes(&bytes),
            text,
        };

        let chunks = chunk_document(&document, self.options.chunking)?;
        if chunks.is_empty() {
            return Ok(Progress::Skipped(Stage::Chunked, SkipReason::NoChunks));
        }
        info!(document = document_id, stage = %Stage::Chunked, chunks = chunks.len(), "text chunked");

        let vectors = match self
            .batcher
            .embed_batched(document_id, &chunks, &self.provider)
            .await
        {
            Ok(vectors) => vectors,
            Err(BatchEmbeddingError {
                batch_start,
                source: ProviderError::CountMismatch { expected, actual },
                ..
            }) => {
                return Ok(Progress::Skipped(
                    Stage::Chunked,
                    SkipReason::EmbeddingCountMismatch {
                        batch_start,
                        expected,
                        actual,
                    },
                ))
            }
            Err(failure) => return Err(failure.into()),
        };
        info!(document = document_id, stage = %Stage::Embedded, vectors = vectors.len(), "chunks embedded");

        let ingested_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let records: Vec<IngestionRecord> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IngestionRecord {
                id: chunk.id(),
                vector,
                metadata: ChunkMetadata {
                    text: chunk.text.clone(),
                    source: document.title.clone(),
                    document_id: document.document_id.clone(),
                    year: document.year.clone(),
                    chunk_index: chunk.index,
                    checksum: document.checksum.clone(),
                    ingested_at: ingested_at.clone(),
                },
            })
            .collect();

        for slice in records.chunks(self.batcher.batch_size()) {
            self.store
                .upsert_records(&self.options.index_name, slice)
                .await?;
        }
        info!(document = document_id, stage = %Stage::Stored, records = records.len(), "chunks stored");

        Ok(Progress::Stored(records.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::tests::RecordingProvider;
    use crate::chunking::ChunkingConfig;
    use crate::error::ExtractionError;
    use crate::models::chunk_id;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::extractor::LopdfExtractor;
    use crate::stores::InMemoryStore;
    use crate::test_support::blank_pdf;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::tempdir;

    const INDEX: &str = "letters";

    /// Treats file bytes as UTF-8 text; anything starting with "broken" fails
    /// to parse.
    struct PlainTextExtractor;

    #[async_trait]
    impl TextExtractor for PlainTextExtractor {
        async fn extract_text(
            &self,
            source_name: &str,
            bytes: &[u8],
        ) -> Result<String, ExtractionError> {
            let text = String::from_utf8_lossy(bytes).to_string();
            if text.starts_with("broken") {
                return Err(ExtractionError::PdfParse(format!(
                    "cannot parse {source_name}"
                )));
            }
            Ok(text)
        }
    }

    fn options(max_chars: usize, overlap_chars: usize, batch_size: usize) -> IngestionOptions {
        IngestionOptions {
            index_name: INDEX.to_string(),
            chunking: ChunkingConfig::new(max_chars, overlap_chars).unwrap(),
            batch_size,
        }
    }

    async fn ready_store() -> InMemoryStore {
        let store = InMemoryStore::default();
        store.create_index(INDEX, 2).await.unwrap();
        store
    }

    fn pipeline(
        store: &InMemoryStore,
        provider: RecordingProvider,
    ) -> IngestionPipeline<PlainTextExtractor, RecordingProvider, InMemoryStore> {
        IngestionPipeline::new(PlainTextExtractor, provider, store.clone(), options(50, 10, 4))
            .unwrap()
    }

    fn prose(words: usize) -> String {
        (0..words)
            .map(|index| format!("word{index}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn discover_pdf_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        fs::write(base.join("a.pdf"), b"%PDF-1.4\n%fake")?;
        fs::write(nested.join("b.PDF"), b"%PDF-1.4\n%fake")?;
        fs::write(base.join("notes.txt"), b"ignored")?;

        let files = discover_pdf_files(base);
        assert_eq!(files.len(), 2);

        let documents = discover_documents(base)?;
        let ids: Vec<&str> = documents
            .iter()
            .map(|document| document.document_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a.pdf", "nested/b.PDF"]);
        Ok(())
    }

    #[test]
    fn missing_folder_is_a_config_error() {
        let dir = tempdir().unwrap();
        let result = discover_documents(&dir.path().join("absent"));
        assert!(matches!(result, Err(ConfigError::DocumentsFolder(_))));
    }

    #[test]
    fn checksum_is_reproducible() {
        assert_eq!(digest_bytes(b"abc"), digest_bytes(b"abc"));
        assert_ne!(digest_bytes(b"abc"), digest_bytes(b"abd"));
    }

    #[test]
    fn year_is_taken_from_standalone_digits() {
        assert_eq!(extract_year("1977.pdf").as_deref(), Some("1977"));
        assert_eq!(extract_year("letter-2008-final.pdf").as_deref(), Some("2008"));
        assert_eq!(extract_year("report.pdf"), None);
        assert_eq!(extract_year("scan_120071.pdf"), None);
    }

    #[tokio::test]
    async fn failing_document_does_not_stop_the_others() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("1.pdf"), prose(40))?;
        fs::write(dir.path().join("2.pdf"), "broken xref table")?;
        fs::write(dir.path().join("3.pdf"), prose(25))?;

        let store = ready_store().await;
        let report = pipeline(&store, RecordingProvider::default())
            .ingest_folder(dir.path())
            .await?;

        let stored: Vec<&str> = report
            .stored
            .iter()
            .map(|document| document.document_id.as_str())
            .collect();
        assert_eq!(stored, vec!["1.pdf", "3.pdf"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].document_id, "2.pdf");
        assert_eq!(report.failed[0].stage, Stage::Started);
        assert!(matches!(
            report.failed[0].error,
            DocumentError::Extraction(ExtractionError::PdfParse(_))
        ));
        assert!(report.has_failures());

        let ids = store.ids(INDEX).await;
        assert_eq!(ids.len(), report.total_chunks());
        assert!(ids.iter().all(|id| !id.starts_with("2.pdf")));
        Ok(())
    }

    #[tokio::test]
    async fn reingesting_overwrites_the_same_ids() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("1984.pdf"), prose(60))?;

        let store = ready_store().await;
        let pipeline = pipeline(&store, RecordingProvider::default());

        let first = pipeline.ingest_folder(dir.path()).await?;
        let ids_after_first = store.ids(INDEX).await;
        let second = pipeline.ingest_folder(dir.path()).await?;
        let ids_after_second = store.ids(INDEX).await;

        assert_eq!(first.total_chunks(), second.total_chunks());
        assert_eq!(ids_after_first, ids_after_second);
        assert_eq!(ids_after_first.len(), first.total_chunks());

        let metadata = store
            .metadata(INDEX, &chunk_id("1984.pdf", 0))
            .await
            .expect("first chunk should be stored");
        assert_eq!(metadata.year.as_deref(), Some("1984"));
        assert_eq!(metadata.source, "1984.pdf");
        assert_eq!(metadata.chunk_index, 0);
        assert_eq!(metadata.checksum.len(), 64);
        Ok(())
    }

    #[tokio::test]
    async fn upserts_and_embeddings_use_bounded_batches() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("long.pdf"), prose(120))?;

        let store = ready_store().await;
        let provider = RecordingProvider::default();
        let report = pipeline(&store, provider.clone())
            .ingest_folder(dir.path())
            .await?;

        let calls = provider.calls.lock().unwrap().clone();
        assert!(calls.len() > 1);
        assert!(calls.iter().all(|size| *size <= 4));
        assert_eq!(calls.iter().sum::<usize>(), report.total_chunks());
        Ok(())
    }

    #[tokio::test]
    async fn empty_file_and_empty_text_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("empty.pdf"), b"")?;
        fs::write(dir.path().join("blank.pdf"), " \n\t \n")?;

        let store = ready_store().await;
        let report = pipeline(&store, RecordingProvider::default())
            .ingest_folder(dir.path())
            .await?;

        assert!(report.stored.is_empty());
        assert!(!report.has_failures());
        let reasons: Vec<(&str, &SkipReason)> = report
            .skipped
            .iter()
            .map(|skipped| (skipped.document_id.as_str(), &skipped.reason))
            .collect();
        assert_eq!(
            reasons,
            vec![
                ("blank.pdf", &SkipReason::EmptyExtraction),
                ("empty.pdf", &SkipReason::EmptyFile),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn short_embedding_response_skips_the_document() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("short.pdf"), prose(40))?;

        let store = ready_store().await;
        let provider = RecordingProvider {
            drop_one_on_call: Some(0),
            ..Default::default()
        };
        let report = pipeline(&store, provider).ingest_folder(dir.path()).await?;

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].stage, Stage::Chunked);
        assert!(matches!(
            report.skipped[0].reason,
            SkipReason::EmbeddingCountMismatch {
                batch_start: 0,
                expected: 4,
                actual: 3
            }
        ));
        assert!(store.ids(INDEX).await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn short_response_in_a_later_batch_reports_where_it_started(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("long.pdf"), prose(40))?;

        let store = ready_store().await;
        let provider = RecordingProvider {
            drop_one_on_call: Some(1),
            ..Default::default()
        };
        let report = pipeline(&store, provider).ingest_folder(dir.path()).await?;

        assert_eq!(report.skipped.len(), 1);
        match &report.skipped[0].reason {
            SkipReason::EmbeddingCountMismatch {
                batch_start,
                expected,
                actual,
            } => {
                assert_eq!(*batch_start, 4);
                assert_eq!(*actual + 1, *expected);
            }
            other => panic!("unexpected skip reason: {other}"),
        }
        assert!(report.skipped[0].reason.to_string().contains("starting at chunk 4"));
        assert!(store.ids(INDEX).await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn pdf_without_text_layer_is_skipped_not_failed(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("scan-1990.pdf"), blank_pdf())?;

        let embedder = CharacterNgramEmbedder::default();
        let store = InMemoryStore::default();
        store.create_index(INDEX, embedder.dimension()).await?;
        let pipeline =
            IngestionPipeline::new(LopdfExtractor, embedder, store.clone(), options(50, 10, 4))?;

        let report = pipeline.ingest_folder(dir.path()).await?;

        assert!(report.failed.is_empty());
        assert!(report.stored.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].document_id, "scan-1990.pdf");
        assert_eq!(report.skipped[0].reason, SkipReason::EmptyExtraction);
        assert!(store.ids(INDEX).await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn provider_error_fails_only_that_document() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("a.pdf"), "short text")?;
        fs::write(dir.path().join("b.pdf"), "another short text")?;

        let store = ready_store().await;
        let provider = RecordingProvider {
            fail_on_call: Some(0),
            ..Default::default()
        };
        let report = pipeline(&store, provider).ingest_folder(dir.path()).await?;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].document_id, "a.pdf");
        assert_eq!(report.failed[0].stage, Stage::Chunked);
        assert_eq!(report.stored.len(), 1);
        assert_eq!(report.stored[0].document_id, "b.pdf");
        Ok(())
    }

    #[tokio::test]
    async fn missing_index_is_fatal_before_any_document() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.pdf"), "text").unwrap();

        let store = InMemoryStore::default();
        let provider = RecordingProvider::default();
        let result = pipeline(&store, provider.clone())
            .ingest_folder(dir.path())
            .await;

        assert!(matches!(result, Err(ConfigError::IndexMissing(_))));
        assert!(provider.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn index_dimension_must_match_provider() {
        let store = InMemoryStore::default();
        store.create_index(INDEX, 768).await.unwrap();

        let result = pipeline(&store, RecordingProvider::default())
            .ingest_all(&[])
            .await;

        assert!(matches!(
            result,
            Err(ConfigError::DimensionMismatch {
                index_dimension: 768,
                provider_dimension: 2,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn empty_folder_yields_an_empty_report() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = ready_store().await;
        let report = pipeline(&store, RecordingProvider::default())
            .ingest_folder(dir.path())
            .await?;

        assert_eq!(report.processed(), 0);
        assert!(!report.cancelled);
        Ok(())
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_next_document() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("a.pdf"), "first")?;
        fs::write(dir.path().join("b.pdf"), "second")?;

        let store = ready_store().await;
        let (sender, receiver) = watch::channel(true);
        let report = pipeline(&store, RecordingProvider::default())
            .with_cancellation(receiver)
            .ingest_folder(dir.path())
            .await?;
        drop(sender);

        assert!(report.cancelled);
        assert_eq!(report.processed(), 0);
        assert_eq!(report.not_started, vec!["a.pdf", "b.pdf"]);
        Ok(())
    }

    #[test]
    fn invalid_options_are_rejected_up_front() {
        let store = InMemoryStore::default();
        let mut bad = options(50, 10, 4);
        bad.batch_size = 0;
        let result =
            IngestionPipeline::new(PlainTextExtractor, RecordingProvider::default(), store, bad);
        assert!(matches!(result, Err(ConfigError::InvalidBatchSize(0))));
    }
}
