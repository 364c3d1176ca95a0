use super::{send_with_retry, RetryPolicy};
use crate::chat::{ChatModel, ChatRequest};
use crate::embeddings::EmbeddingProvider;
use crate::error::ProviderError;
use crate::models::EmbeddingVector;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const PROVIDER: &str = "openai";

/// OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) model: String,
    pub(crate) dimension: usize,
    pub(crate) requested_dimensions: Option<usize>,
    pub(crate) retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// The API may return items out of order; `index` is authoritative.
fn parse_embeddings(response: EmbeddingResponse) -> Vec<EmbeddingVector> {
    let mut data = response.data;
    data.sort_by_key(|item| item.index);
    data.into_iter().map(|item| item.embedding).collect()
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.requested_dimensions,
        };
        let url = format!("{}/embeddings", self.base_url);

        let response = send_with_retry(PROVIDER, &self.retry, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|error| ProviderError::InvalidResponse(error.to_string()))?;
        Ok(parse_embeddings(parsed))
    }
}

/// OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiChat {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) model: String,
    pub(crate) retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn parse_completion(response: ChatCompletionResponse) -> Result<String, ProviderError> {
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ProviderError::InvalidResponse(
            "chat completion returned no content".to_string(),
        ));
    }
    Ok(text.trim().to_string())
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest<'_>) -> Result<String, ProviderError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.system,
                },
                ChatMessage {
                    role: "user",
                    content: request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        let url = format!("{}/chat/completions", self.base_url);

        let response = send_with_retry(PROVIDER, &self.retry, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|error| ProviderError::InvalidResponse(error.to_string()))?;
        parse_completion(parsed)
    }
}
