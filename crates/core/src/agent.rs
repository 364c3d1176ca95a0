use crate::chat::{ChatModel, ChatRequest};
use crate::embeddings::EmbeddingProvider;
use crate::error::{AgentError, ProviderError};
use crate::models::QueryMatch;
use crate::store::VectorStore;
use tracing::{debug, info};

pub const DEFAULT_TOP_K: usize = 5;

pub const DEFAULT_INSTRUCTIONS: &str = "You are a careful financial analyst answering questions about a collection of shareholder letters. \
Answer only from the excerpts supplied in the context. \
When you rely on an excerpt, quote or paraphrase it and name its source and year. \
If the excerpts do not cover the question, say so plainly instead of guessing.";

pub const NO_CONTEXT_ANSWER: &str =
    "I could not find any relevant passages in the indexed documents for that question.";

#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub index_name: String,
    pub top_k: usize,
    pub instructions: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl AgentOptions {
    pub fn new(index_name: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
            top_k: DEFAULT_TOP_K,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            temperature: 0.2,
            max_tokens: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Citation {
    pub chunk_id: String,
    pub source: String,
    pub year: Option<String>,
    pub score: f64,
}

impl From<&QueryMatch> for Citation {
    fn from(found: &QueryMatch) -> Self {
        Self {
            chunk_id: found.id.clone(),
            source: found.metadata.source.clone(),
            year: found.metadata.year.clone(),
            score: found.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
}

/// Question in, grounded answer out: embed, look up the nearest chunks, then
/// let the chat model answer from them.
pub struct RetrievalAgent<P, S, C> {
    provider: P,
    store: S,
    chat: C,
    options: AgentOptions,
}

impl<P, S, C> RetrievalAgent<P, S, C>
where
    P: EmbeddingProvider,
    S: VectorStore,
    C: ChatModel,
{
    pub fn new(provider: P, store: S, chat: C, options: AgentOptions) -> Self {
        Self {
            provider,
            store,
            chat,
            options,
        }
    }

    pub async fn retrieve(&self, question: &str) -> Result<Vec<QueryMatch>, AgentError> {
        retrieve_matches(
            &self.provider,
            &self.store,
            &self.options.index_name,
            question,
            self.options.top_k,
        )
        .await
    }

    pub async fn ask(&self, question: &str) -> Result<Answer, AgentError> {
        let matches = self.retrieve(question).await?;
        if matches.is_empty() {
            info!("no matching passages; answering without the model");
            return Ok(Answer {
                text: NO_CONTEXT_ANSWER.to_string(),
                citations: Vec::new(),
            });
        }

        let prompt = build_prompt(question.trim(), &render_context(&matches));
        let request = ChatRequest {
            system: &self.options.instructions,
            prompt: &prompt,
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
        };
        info!(model = self.chat.name(), passages = matches.len(), "asking chat model");
        let text = self.chat.complete(&request).await?;

        Ok(Answer {
            text,
            citations: matches.iter().map(Citation::from).collect(),
        })
    }
}

/// Embeds `question` and returns the `top_k` nearest stored chunks.
pub async fn retrieve_matches<P, S>(
    provider: &P,
    store: &S,
    index: &str,
    question: &str,
    top_k: usize,
) -> Result<Vec<QueryMatch>, AgentError>
where
    P: EmbeddingProvider + ?Sized,
    S: VectorStore + ?Sized,
{
    let question = question.trim();
    if question.is_empty() {
        return Err(AgentError::EmptyQuestion);
    }

    let mut embedded = provider.embed(&[question.to_string()]).await?;
    if embedded.len() != 1 {
        return Err(ProviderError::CountMismatch {
            expected: 1,
            actual: embedded.len(),
        }
        .into());
    }
    let vector = embedded.remove(0);
    if vector.len() != provider.dimension() {
        return Err(ProviderError::DimensionMismatch {
            expected: provider.dimension(),
            actual: vector.len(),
        }
        .into());
    }

    let matches = store.query(index, &vector, top_k).await?;
    debug!(index, top_k, matches = matches.len(), "retrieved context");
    Ok(matches)
}

pub fn render_context(matches: &[QueryMatch]) -> String {
    let mut out = String::new();
    for found in matches {
        out.push_str(&format!(
            "Source: {} | Year: {} | Chunk ID: {} | Score: {:.4}\n{}\n---\n",
            found.metadata.source,
            found.metadata.year.as_deref().unwrap_or("unknown"),
            found.id,
            found.score,
            found.metadata.text.trim()
        ));
    }
    out
}

fn build_prompt(question: &str, context_block: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str("Context excerpts:\n");
    prompt.push_str(context_block);
    prompt.push_str("\nQuestion:\n");
    prompt.push_str(question);
    prompt.push_str("\n\nAnswer using only the excerpts above. Cite each excerpt you use by source and year.\n");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::ChunkMetadata;
    use crate::stores::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    const INDEX: &str = "letters";

    #[derive(Clone, Default)]
    struct ScriptedChat {
        prompts: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &ChatRequest<'_>) -> Result<String, ProviderError> {
            self.prompts
                .lock()
                .unwrap()
                .push((request.system.to_string(), request.prompt.to_string()));
            Ok("Float funds the investments.".to_string())
        }
    }

    fn metadata(text: &str, source: &str, year: &str, index: usize) -> ChunkMetadata {
        ChunkMetadata {
            text: text.to_string(),
            source: source.to_string(),
            document_id: source.to_string(),
            year: Some(year.to_string()),
            chunk_index: index,
            checksum: "c".to_string(),
            ingested_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    async fn seeded_store(embedder: &CharacterNgramEmbedder) -> InMemoryStore {
        let store = InMemoryStore::default();
        store.create_index(INDEX, embedder.dimensions).await.unwrap();

        let passages = [
            ("Insurance float has been a source of low-cost funds.", "1995.pdf", "1995"),
            ("Railroads move freight efficiently across the country.", "2010.pdf", "2010"),
        ];
        let ids: Vec<String> = passages
            .iter()
            .map(|(_, source, _)| format!("{source}-chunk-0"))
            .collect();
        let vectors: Vec<_> = passages
            .iter()
            .map(|(text, _, _)| embedder.embed_text(text))
            .collect();
        let metadata: Vec<_> = passages
            .iter()
            .map(|(text, source, year)| metadata(text, source, year, 0))
            .collect();
        store.upsert(INDEX, &ids, &vectors, &metadata).await.unwrap();
        store
    }

    #[tokio::test]
    async fn answer_cites_retrieved_passages() {
        let embedder = CharacterNgramEmbedder::default();
        let store = seeded_store(&embedder).await;
        let chat = ScriptedChat::default();
        let mut options = AgentOptions::new(INDEX);
        options.top_k = 1;
        let agent = RetrievalAgent::new(embedder, store, chat.clone(), options);

        let answer = agent.ask("How does insurance float work?").await.unwrap();

        assert_eq!(answer.text, "Float funds the investments.");
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].chunk_id, "1995.pdf-chunk-0");
        assert_eq!(answer.citations[0].year.as_deref(), Some("1995"));

        let prompts = chat.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].0, DEFAULT_INSTRUCTIONS);
        assert!(prompts[0].1.contains("Insurance float"));
        assert!(prompts[0].1.contains("How does insurance float work?"));
    }

    #[tokio::test]
    async fn empty_index_answers_without_calling_the_model() {
        let embedder = CharacterNgramEmbedder::default();
        let store = InMemoryStore::default();
        store.create_index(INDEX, embedder.dimensions).await.unwrap();
        let chat = ScriptedChat::default();
        let agent = RetrievalAgent::new(embedder, store, chat.clone(), AgentOptions::new(INDEX));

        let answer = agent.ask("Anything about textiles?").await.unwrap();

        assert_eq!(answer.text, NO_CONTEXT_ANSWER);
        assert!(answer.citations.is_empty());
        assert!(chat.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let agent = RetrievalAgent::new(
            CharacterNgramEmbedder::default(),
            InMemoryStore::default(),
            ScriptedChat::default(),
            AgentOptions::new(INDEX),
        );
        assert!(matches!(
            agent.ask("   ").await,
            Err(AgentError::EmptyQuestion)
        ));
    }

    #[tokio::test]
    async fn missing_index_surfaces_as_storage_error() {
        let agent = RetrievalAgent::new(
            CharacterNgramEmbedder::default(),
            InMemoryStore::default(),
            ScriptedChat::default(),
            AgentOptions::new(INDEX),
        );
        assert!(matches!(
            agent.retrieve("float").await,
            Err(AgentError::Storage(_))
        ));
    }

    #[test]
    fn context_lists_source_year_and_chunk() {
        let rendered = render_context(&[QueryMatch {
            id: "1977.pdf-chunk-4".to_string(),
            score: 0.91234,
            metadata: metadata("  Textile operations remain difficult. ", "1977.pdf", "1977", 4),
        }]);

        assert!(rendered.starts_with("Source: 1977.pdf | Year: 1977 | Chunk ID: 1977.pdf-chunk-4 | Score: 0.9123\n"));
        assert!(rendered.contains("Textile operations remain difficult.\n---"));
    }
}
