use async_trait::async_trait;
use log::info;
use std::error::Error as StdError;

use super::{ ChatClient, CompletionRequest, CompletionResponse };
use crate::llm::{ LlmConfig, LlmType };
use rllm::builder::{ LLMBackend, LLMBuilder };
use rllm::chat::{ ChatMessage, ChatRole, MessageType };

/// Hosted chat APIs reached through rllm. The templated prompt travels as a
/// single user message.
pub struct HostedChatClient {
    llm_type: LlmType,
    api_key: String,
    model: String,
    base_url: Option<String>,
}

fn default_model(llm_type: &LlmType) -> &'static str {
    match llm_type {
        LlmType::Anthropic => "claude-3-5-haiku-latest",
        LlmType::Gemini => "gemini-1.5-flash-latest",
        LlmType::DeepSeek => "deepseek-chat",
        LlmType::XAI => "grok-2-latest",
        LlmType::Groq => "llama-3.1-8b-instant",
        LlmType::Ollama => "mistral",
        LlmType::OpenAI => "gpt-4o-mini",
    }
}

impl HostedChatClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| format!("API key is required for {:?} chat client", config.llm_type))?;
        let model = config.completion_model
            .clone()
            .unwrap_or_else(|| default_model(&config.llm_type).to_string());

        Ok(Self {
            llm_type: config.llm_type.clone(),
            api_key,
            model,
            base_url: config.base_url.clone(),
        })
    }

    fn backend(&self) -> LLMBackend {
        self.llm_type.backend()
    }
}

#[async_trait]
impl ChatClient for HostedChatClient {
    async fn complete(
        &self,
        request: &CompletionRequest
    ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>> {
        let mut builder = LLMBuilder::new()
            .backend(self.backend())
            .api_key(self.api_key.clone())
            .model(&self.model)
            .max_tokens(request.max_tokens)
            .temperature(request.temperature)
            .stream(false);

        if let Some(url) = &self.base_url {
            builder = builder.base_url(url);
        }

        let provider = builder.build()?;
        let messages = vec![ChatMessage {
            role: ChatRole::User,
            content: request.prompt.clone(),
            message_type: MessageType::Text,
        }];
        info!("HostedChatClient::complete() → {:?} model={} base_url={:?}", self.llm_type, self.model, self.base_url);
        let resp = provider.chat(&messages).await?;
        let text = resp
            .text()
            .map(|s| s.to_string())
            .unwrap_or_else(|| resp.to_string());
        Ok(CompletionResponse { response: text })
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }

    fn get_base_url(&self) -> Option<String> {
        self.base_url.clone()
    }
}
