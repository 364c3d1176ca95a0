//! HTTP-backed embedding and chat providers, plus the settings that pick one.

pub mod google;
pub mod openai;

pub use google::{GeminiChat, GoogleEmbedder};
pub use openai::{OpenAiChat, OpenAiEmbedder};

use crate::chat::ChatModel;
use crate::embeddings::{CharacterNgramEmbedder, EmbeddingProvider, DEFAULT_LOCAL_DIMENSIONS};
use crate::error::{ConfigError, ProviderError};
use reqwest::{Client, RequestBuilder, Response};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProviderKind {
    Google,
    OpenAi,
    Local,
}

impl EmbeddingProviderKind {
    pub fn default_model(&self) -> &'static str {
        match self {
            EmbeddingProviderKind::Google => "text-embedding-004",
            EmbeddingProviderKind::OpenAi => "text-embedding-3-small",
            EmbeddingProviderKind::Local => "char-trigram",
        }
    }

    pub fn default_dimension(&self) -> usize {
        match self {
            EmbeddingProviderKind::Google => 768,
            EmbeddingProviderKind::OpenAi => 1536,
            EmbeddingProviderKind::Local => DEFAULT_LOCAL_DIMENSIONS,
        }
    }

    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            EmbeddingProviderKind::Google => Some("https://generativelanguage.googleapis.com"),
            EmbeddingProviderKind::OpenAi => Some("https://api.openai.com/v1"),
            EmbeddingProviderKind::Local => None,
        }
    }

    pub fn default_chat_model(&self) -> Option<&'static str> {
        match self {
            EmbeddingProviderKind::Google => Some("gemini-2.0-flash"),
            EmbeddingProviderKind::OpenAi => Some("gpt-4o-mini"),
            EmbeddingProviderKind::Local => None,
        }
    }
}

impl fmt::Display for EmbeddingProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EmbeddingProviderKind::Google => "google",
            EmbeddingProviderKind::OpenAi => "openai",
            EmbeddingProviderKind::Local => "local",
        };
        f.write_str(label)
    }
}

impl FromStr for EmbeddingProviderKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "google" | "gemini" => Ok(EmbeddingProviderKind::Google),
            "openai" => Ok(EmbeddingProviderKind::OpenAi),
            "local" => Ok(EmbeddingProviderKind::Local),
            other => Err(ConfigError::InvalidSetting {
                name: "EMBEDDING_PROVIDER".to_string(),
                details: format!("unknown provider {other:?}; use google, openai or local"),
            }),
        }
    }
}

/// Exponential backoff for throttled or flaky provider calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub kind: EmbeddingProviderKind,
    pub api_key: Option<String>,
    pub embedding_model: Option<String>,
    pub dimension: Option<usize>,
    pub base_url: Option<String>,
    pub chat_model: Option<String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl ProviderSettings {
    pub fn new(kind: EmbeddingProviderKind) -> Self {
        Self {
            kind,
            api_key: None,
            embedding_model: None,
            dimension: None,
            base_url: None,
            chat_model: None,
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
            .unwrap_or_else(|| self.kind.default_dimension())
    }

    fn api_key(&self) -> Result<String, ConfigError> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ConfigError::MissingSetting(format!("PROVIDER_API_KEY (required for {})", self.kind))
            })
    }

    fn base_url(&self) -> Result<String, ConfigError> {
        let raw = match (&self.base_url, self.kind.default_base_url()) {
            (Some(explicit), _) => explicit.clone(),
            (None, Some(default)) => default.to_string(),
            (None, None) => {
                return Err(ConfigError::MissingSetting("PROVIDER_BASE_URL".to_string()))
            }
        };
        let parsed = url::Url::parse(&raw)?;
        Ok(parsed.as_str().trim_end_matches('/').to_string())
    }

    fn client(&self) -> Result<Client, ConfigError> {
        Ok(Client::builder().timeout(self.timeout).build()?)
    }
}

pub fn build_embedding_provider(
    settings: &ProviderSettings,
) -> Result<Box<dyn EmbeddingProvider>, ConfigError> {
    let model = settings
        .embedding_model
        .clone()
        .unwrap_or_else(|| settings.kind.default_model().to_string());

    match settings.kind {
        EmbeddingProviderKind::Local => Ok(Box::new(CharacterNgramEmbedder {
            dimensions: settings.dimension(),
        })),
        EmbeddingProviderKind::Google => Ok(Box::new(GoogleEmbedder {
            client: settings.client()?,
            base_url: settings.base_url()?,
            api_key: settings.api_key()?,
            model,
            dimension: settings.dimension(),
            output_dimensionality: settings.dimension,
            retry: settings.retry,
        })),
        EmbeddingProviderKind::OpenAi => Ok(Box::new(OpenAiEmbedder {
            client: settings.client()?,
            base_url: settings.base_url()?,
            api_key: settings.api_key()?,
            model,
            dimension: settings.dimension(),
            requested_dimensions: settings.dimension,
            retry: settings.retry,
        })),
    }
}

pub fn build_chat_model(settings: &ProviderSettings) -> Result<Box<dyn ChatModel>, ConfigError> {
    let model = match (&settings.chat_model, settings.kind.default_chat_model()) {
        (Some(model), _) => model.clone(),
        (None, Some(default)) => default.to_string(),
        (None, None) => {
            return Err(ConfigError::InvalidSetting {
                name: "EMBEDDING_PROVIDER".to_string(),
                details: format!("{} has no chat model; use google or openai", settings.kind),
            })
        }
    };

    match settings.kind {
        EmbeddingProviderKind::Google => Ok(Box::new(GeminiChat {
            client: settings.client()?,
            base_url: settings.base_url()?,
            api_key: settings.api_key()?,
            model,
            retry: settings.retry,
        })),
        EmbeddingProviderKind::OpenAi => Ok(Box::new(OpenAiChat {
            client: settings.client()?,
            base_url: settings.base_url()?,
            api_key: settings.api_key()?,
            model,
            retry: settings.retry,
        })),
        EmbeddingProviderKind::Local => Err(ConfigError::InvalidSetting {
            name: "EMBEDDING_PROVIDER".to_string(),
            details: "local provider has no chat model".to_string(),
        }),
    }
}

/// Sends a request, retrying throttling, server errors and transport failures.
/// Non-success responses that are not retried come back as
/// `ProviderError::Response` with the body attached.
pub(crate) async fn send_with_retry<F>(
    provider: &str,
    policy: &RetryPolicy,
    build: F,
) -> Result<Response, ProviderError>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let error = match build().send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<body unavailable>".to_string());
                ProviderError::Response {
                    provider: provider.to_string(),
                    status,
                    body,
                }
            }
            Err(error) => ProviderError::Http(error),
        };

        if attempt >= policy.max_attempts.max(1) || !error.is_retryable() {
            return Err(error);
        }

        let delay = policy.backoff(attempt);
        warn!(provider, attempt, delay_ms = delay.as_millis() as u64, %error, "retrying provider request");
        tokio::time::sleep(delay).await;
    }
}
