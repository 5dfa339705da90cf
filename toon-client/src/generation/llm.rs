use async_openai::{
    config::OpenAIConfig, types::ChatCompletionRequestMessage,
    types::ChatCompletionRequestUserMessage, types::CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;

use crate::config::{ChatModel, Config};
use crate::errors::{Result, ToonError};

/// Anything that can answer a one-shot prompt.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, model: ChatModel, prompt: &str) -> Result<String>;
}

/// The hosted OpenAI chat completion API.
#[derive(Clone)]
pub struct OpenAiChat {
    client: async_openai::Client<OpenAIConfig>,
}

impl OpenAiChat {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: async_openai::Client::with_config(config.openai_config()?),
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiChat {
    /// Calls the LLM one-shot API with a given prompt.
    ///
    /// Temperature is pinned to zero so the same script gives the same scenes
    /// as far as the model allows.
    async fn complete(&self, model: ChatModel, prompt: &str) -> Result<String> {
        let req_args = CreateChatCompletionRequestArgs::default()
            .model(model.to_string())
            .temperature(0.0)
            .messages([ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessage {
                    content: prompt.into(),
                    name: None,
                },
            )])
            .build()
            .map_err(|e| ToonError::Generation(e.to_string()))?;
        let text = self
            .client
            .chat()
            .create(req_args)
            .await
            .map_err(|e| ToonError::Generation(e.to_string()))?
            .choices
            .first()
            .ok_or(ToonError::Generation("No response from LLM".to_string()))?
            .clone()
            .message
            .content
            .ok_or(ToonError::Generation("No response from LLM".to_string()))?;
        Ok(text)
    }
}

#[async_trait]
impl<T: ChatBackend + ?Sized> ChatBackend for &T {
    async fn complete(&self, model: ChatModel, prompt: &str) -> Result<String> {
        (**self).complete(model, prompt).await
    }
}

#[async_trait]
impl<T: ChatBackend + ?Sized> ChatBackend for std::sync::Arc<T> {
    async fn complete(&self, model: ChatModel, prompt: &str) -> Result<String> {
        (**self).complete(model, prompt).await
    }
}
