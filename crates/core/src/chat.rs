use crate::error::ProviderError;
use async_trait::async_trait;

/// Request envelope shared by the chat providers.
#[derive(Debug, Clone)]
pub struct ChatRequest<'a> {
    pub system: &'a str,
    pub prompt: &'a str,
    pub temperature: f32,
    pub max_tokens: usize,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &ChatRequest<'_>) -> Result<String, ProviderError>;
}

#[async_trait]
impl<T: ChatModel + ?Sized> ChatModel for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn complete(&self, request: &ChatRequest<'_>) -> Result<String, ProviderError> {
        (**self).complete(request).await
    }
}
