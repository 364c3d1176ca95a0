use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use pdf_rag_core::{
    build_chat_model, build_embedding_provider, prepare_index, render_context, retrieve_matches,
    AgentOptions, ChunkingConfig, ConfigError, EmbeddingProvider, EmbeddingProviderKind,
    InMemoryStore, IngestionOptions, IngestionPipeline, IngestionReport, LopdfExtractor,
    OcrEndpointConfig, OcrFallbackExtractor, PgVectorStore, ProviderSettings, QdrantStore,
    RetrievalAgent, VectorStore, DEFAULT_BATCH_SIZE, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE,
    DEFAULT_TOP_K,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit status for a run stopped by Ctrl-C.
const INTERRUPTED_EXIT_CODE: i32 = 130;
const SAMPLE_SENTENCE: &str = "Our gain in net worth during the year was satisfactory.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Pgvector,
    Qdrant,
    Memory,
}

#[derive(Parser)]
#[command(name = "pdf-rag", version, about = "Ingest PDFs into a vector index and ask grounded questions")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Postgres connection string for pgvector, or the Qdrant base URL.
    #[arg(long, env = "POSTGRES_CONNECTION_STRING", hide_env_values = true, global = true)]
    connection_string: Option<String>,

    /// Name of the vector index.
    #[arg(long, env = "INDEX_NAME", global = true)]
    index_name: Option<String>,

    /// API key for the embedding and chat provider.
    #[arg(long, env = "PROVIDER_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    #[arg(long, env = "VECTOR_STORE", value_enum, default_value_t = StoreKind::Pgvector, global = true)]
    store: StoreKind,

    /// google, openai or local
    #[arg(long, env = "EMBEDDING_PROVIDER", default_value = "google", global = true)]
    embedding_provider: EmbeddingProviderKind,

    #[arg(long, env = "EMBEDDING_MODEL", global = true)]
    embedding_model: Option<String>,

    /// Overrides the provider's default vector width.
    #[arg(long, env = "EMBEDDING_DIMENSION", global = true)]
    embedding_dimension: Option<usize>,

    #[arg(long, env = "PROVIDER_BASE_URL", global = true)]
    provider_base_url: Option<String>,

    #[arg(long, env = "CHAT_MODEL", global = true)]
    chat_model: Option<String>,

    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true, global = true)]
    qdrant_api_key: Option<String>,

    /// Maximum chunk length in characters.
    #[arg(long, env = "CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE, global = true)]
    chunk_size: usize,

    /// Characters shared between consecutive chunks.
    #[arg(long, env = "CHUNK_OVERLAP", default_value_t = DEFAULT_CHUNK_OVERLAP, global = true)]
    chunk_overlap: usize,

    /// Chunks per embedding request and records per upsert.
    #[arg(long, env = "BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE, global = true)]
    batch_size: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Create the vector index sized for the configured provider.
    Setup {
        /// Drop the index first. A failing drop is reported and ignored.
        #[arg(long, default_value_t = false)]
        recreate: bool,
    },
    /// Extract, chunk, embed and store every PDF under a folder.
    Ingest {
        #[arg(long, default_value = "documents")]
        folder: PathBuf,
        /// Exit non-zero when any document failed.
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// Answer a question from the indexed documents.
    Ask {
        #[arg(long)]
        question: String,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        /// Print the retrieved context and skip the chat model.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Print the nearest chunks for a query.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
    },
    /// Embed a sample sentence to verify the provider key and dimension.
    CheckProvider,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    match dotenv {
        Ok(path) => debug!(path = %path.display(), "loaded environment file"),
        Err(error) if error.not_found() => {}
        Err(error) => warn!(%error, "could not read .env"),
    }

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        store = ?cli.store,
        provider = %cli.embedding_provider,
        "pdf-rag boot"
    );

    match &cli.command {
        Command::Setup { recreate } => run_setup(&cli, *recreate).await,
        Command::Ingest { folder, strict } => run_ingest(&cli, folder, *strict).await,
        Command::Ask {
            question,
            top_k,
            dry_run,
        } => run_ask(&cli, question, *top_k, *dry_run).await,
        Command::Search { query, top_k } => run_search(&cli, query, *top_k).await,
        Command::CheckProvider => run_check_provider(&cli).await,
    }
}

impl Cli {
    fn provider_settings(&self) -> ProviderSettings {
        let mut settings = ProviderSettings::new(self.embedding_provider);
        settings.api_key = self.api_key.clone();
        settings.embedding_model = self.embedding_model.clone();
        settings.dimension = self.embedding_dimension;
        settings.base_url = self.provider_base_url.clone();
        settings.chat_model = self.chat_model.clone();
        settings
    }

    fn index_name(&self) -> Result<&str, ConfigError> {
        self.index_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ConfigError::MissingSetting("INDEX_NAME".to_string()))
    }

    fn connection_string(&self) -> Result<&str, ConfigError> {
        self.connection_string
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ConfigError::MissingSetting("POSTGRES_CONNECTION_STRING".to_string()))
    }

    /// The memory backend starts empty on every run, so its index is created
    /// here for `dimension`.
    async fn open_store(&self, index: &str, dimension: usize) -> anyhow::Result<Box<dyn VectorStore>> {
        match self.store {
            StoreKind::Pgvector => {
                let store = PgVectorStore::connect(self.connection_string()?)
                    .await
                    .context("could not connect to postgres")?;
                Ok(Box::new(store))
            }
            StoreKind::Qdrant => {
                let store = QdrantStore::new(self.connection_string()?, self.qdrant_api_key.clone())
                    .map_err(ConfigError::from)?;
                Ok(Box::new(store))
            }
            StoreKind::Memory => {
                warn!("memory store selected; nothing outlives this process");
                let store = InMemoryStore::default();
                store.create_index(index, dimension).await?;
                Ok(Box::new(store))
            }
        }
    }
}

async fn run_setup(cli: &Cli, recreate: bool) -> anyhow::Result<ExitCode> {
    let dimension = cli.provider_settings().dimension();
    let index = cli.index_name()?;
    let store = cli.open_store(index, dimension).await?;

    let outcome = prepare_index(&store, index, dimension, recreate)
        .await
        .with_context(|| format!("could not create index {index}"))?;

    if let Some(error) = &outcome.drop_error {
        println!("warning: dropping {} failed and was ignored: {error}", outcome.index);
    }
    println!(
        "index {} ready on {} ({} dimensions{})",
        outcome.index,
        store.backend(),
        outcome.dimension,
        if outcome.dropped { ", recreated" } else { "" }
    );
    Ok(ExitCode::SUCCESS)
}

/// The first interrupt asks the pipeline to stop after the current document.
/// Returns `true` once a second interrupt arrives, `false` if signals cannot be
/// received.
async fn wait_for_forced_interrupt<F, Fut>(
    mut next_interrupt: F,
    cancel: watch::Sender<bool>,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if next_interrupt().await.is_err() {
        return false;
    }
    warn!("interrupt received; stopping after the current document (press Ctrl-C again to quit now)");
    let _ = cancel.send(true);

    next_interrupt().await.is_ok()
}

async fn run_ingest(cli: &Cli, folder: &Path, strict: bool) -> anyhow::Result<ExitCode> {
    let provider = build_embedding_provider(&cli.provider_settings())?;
    let index = cli.index_name()?;
    let store = cli.open_store(index, provider.dimension()).await?;

    let mut options = IngestionOptions::new(index);
    options.chunking =
        ChunkingConfig::new(cli.chunk_size, cli.chunk_overlap).map_err(ConfigError::from)?;
    options.batch_size = cli.batch_size;

    let extractor = OcrFallbackExtractor::new(LopdfExtractor, OcrEndpointConfig::from_env());

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if wait_for_forced_interrupt(tokio::signal::ctrl_c, cancel_tx).await {
            warn!("second interrupt received; exiting immediately");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    });

    let pipeline = IngestionPipeline::new(extractor, provider, store, options)?
        .with_cancellation(cancel_rx);
    let report = pipeline.ingest_folder(folder).await?;

    print_report(&report);

    if report.cancelled {
        return Ok(ExitCode::from(INTERRUPTED_EXIT_CODE as u8));
    }
    if strict && report.has_failures() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &IngestionReport) {
    for stored in &report.stored {
        println!("stored   {} ({} chunks)", stored.document_id, stored.chunks);
    }
    for skipped in &report.skipped {
        println!(
            "skipped  {} after {}: {}",
            skipped.document_id, skipped.stage, skipped.reason
        );
    }
    for failed in &report.failed {
        println!(
            "failed   {} after {}: {}",
            failed.document_id, failed.stage, failed.error
        );
    }
    for pending in &report.not_started {
        println!("pending  {pending}");
    }

    println!(
        "{} stored ({} chunks), {} skipped, {} failed{}",
        report.stored.len(),
        report.total_chunks(),
        report.skipped.len(),
        report.failed.len(),
        if report.cancelled { ", cancelled" } else { "" }
    );
}

async fn run_ask(cli: &Cli, question: &str, top_k: usize, dry_run: bool) -> anyhow::Result<ExitCode> {
    let settings = cli.provider_settings();
    let provider = build_embedding_provider(&settings)?;
    let index = cli.index_name()?;
    let store = cli.open_store(index, provider.dimension()).await?;

    if dry_run {
        let matches = retrieve_matches(&provider, &store, index, question, top_k).await?;
        println!("--- Retrieved Context ---\n{}", render_context(&matches));
        println!("dry-run enabled; skipping chat model.");
        return Ok(ExitCode::SUCCESS);
    }

    let chat = build_chat_model(&settings)?;
    let mut options = AgentOptions::new(index);
    options.top_k = top_k;
    let agent = RetrievalAgent::new(provider, store, chat, options);

    let answer = agent.ask(question).await?;
    println!("--- Answer ---\n{}", answer.text);
    if !answer.citations.is_empty() {
        println!("\n--- Sources ---");
        for (position, citation) in answer.citations.iter().enumerate() {
            println!(
                "[{}] {} ({}) chunk={} score={:.4}",
                position + 1,
                citation.source,
                citation.year.as_deref().unwrap_or("year unknown"),
                citation.chunk_id,
                citation.score
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_search(cli: &Cli, query: &str, top_k: usize) -> anyhow::Result<ExitCode> {
    let provider = build_embedding_provider(&cli.provider_settings())?;
    let index = cli.index_name()?;
    let store = cli.open_store(index, provider.dimension()).await?;

    let matches = retrieve_matches(&provider, &store, index, query, top_k).await?;
    println!("query: {query}");
    for found in matches {
        println!(
            "[{:.4}] chunk={} source={} year={}",
            found.score,
            found.id,
            found.metadata.source,
            found.metadata.year.as_deref().unwrap_or("-")
        );
        println!("  {}", found.metadata.text.trim());
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_check_provider(cli: &Cli) -> anyhow::Result<ExitCode> {
    let provider = build_embedding_provider(&cli.provider_settings())?;
    let vectors = provider
        .embed(&[SAMPLE_SENTENCE.to_string()])
        .await
        .with_context(|| format!("{} rejected the sample request", cli.embedding_provider))?;

    let Some(vector) = vectors.first() else {
        bail!("{} returned no embedding for the sample sentence", cli.embedding_provider);
    };
    if vector.len() != provider.dimension() {
        bail!(
            "{} returned {} dimensions, expected {}",
            provider.name(),
            vector.len(),
            provider.dimension()
        );
    }

    println!(
        "{} ({}) ok: {}-dimensional embeddings",
        cli.embedding_provider,
        provider.name(),
        vector.len()
    );
    Ok(ExitCode::SUCCESS)
}
