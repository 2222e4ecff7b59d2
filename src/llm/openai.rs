use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessageArgs, CreateChatCompletionRequestArgs, CreateEmbeddingRequestArgs,
    Role,
};
use async_openai::Client;
use async_trait::async_trait;

use super::{with_retries, EmbeddingProvider, ProviderError, TextProvider};

/// Text generation through any OpenAI-compatible chat endpoint.
pub struct OpenAiTextProvider {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiTextProvider {
    pub fn new(api_base: &str, api_key: &str, model: impl Into<String>) -> Self {
        let config = OpenAIConfig::new()
            .with_api_base(api_base)
            .with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            model: model.into(),
        }
    }
}

#[async_trait]
impl TextProvider for OpenAiTextProvider {
    async fn generate_text(&self, prompt: &str) -> Result<String, ProviderError> {
        let response = with_retries("generate_text", || async {
            let request = CreateChatCompletionRequestArgs::default()
                .model(&self.model)
                .messages([ChatCompletionRequestMessageArgs::default()
                    .role(Role::User)
                    .content(prompt)
                    .build()?])
                .build()?;

            self.client.chat().create(request).await
        })
        .await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(content)
    }
}

/// Embeddings through any OpenAI-compatible endpoint. The dimension is
/// declared up front; the vector store refuses to run against a table
/// created with a different one.
pub struct OpenAiEmbeddingProvider {
    client: Client<OpenAIConfig>,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbeddingProvider {
    pub fn new(
        api_base: &str,
        api_key: &str,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        let config = OpenAIConfig::new()
            .with_api_base(api_base)
            .with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            model: model.into(),
            dimensions,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let response = with_retries("embed", || async {
            let request = CreateEmbeddingRequestArgs::default()
                .model(&self.model)
                .input(texts.to_vec())
                .build()?;

            self.client.embeddings().create(request).await
        })
        .await?;

        Ok(response
            .data
            .into_iter()
            .map(|embedding| embedding.embedding)
            .collect())
    }
}
