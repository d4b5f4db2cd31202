//! Language-model transport for the interpreter: one async trait, a registry
//! keyed by configured id, an OpenAI-compatible HTTP client and an offline stub.

pub mod openai;
pub mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use openai::OpenAiProvider;
pub use types::*;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse>;

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

/// Backend family. Every hosted family speaks the chat-completions wire format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    OpenAI,
    DeepSeek,
    Groq,
    Ollama,
    OpenRouter,
    /// Any other chat-completions endpoint; `base_url` is mandatory.
    Custom,
    Stub,
}

impl ProviderType {
    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            Self::OpenAI => Some("https://api.openai.com/v1"),
            Self::DeepSeek => Some("https://api.deepseek.com/v1"),
            Self::Groq => Some("https://api.groq.com/openai/v1"),
            Self::OpenRouter => Some("https://openrouter.ai/api/v1"),
            Self::Ollama => Some("http://localhost:11434/v1"),
            Self::Custom | Self::Stub => None,
        }
    }

    pub fn needs_api_key(self) -> bool {
        matches!(
            self,
            Self::OpenAI | Self::DeepSeek | Self::Groq | Self::OpenRouter
        )
    }
}

/// One entry of the `providers:` list in the engine config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Overrides the family's default endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, provider_type: ProviderType) -> Self {
        Self {
            id: id.into(),
            provider_type,
            api_key: None,
            base_url: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn build(&self) -> Result<Arc<dyn LlmProvider>> {
        if self.provider_type == ProviderType::Stub {
            return Ok(Arc::new(StubProvider));
        }

        let key = self
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty());
        let key = match key {
            Some(key) => key.to_string(),
            None if self.provider_type.needs_api_key() => {
                return Err(anyhow!("provider {} requires api_key", self.id));
            }
            // Local servers ignore the bearer token.
            None => "local".to_string(),
        };
        let base_url = self
            .base_url
            .as_deref()
            .or(self.provider_type.default_base_url())
            .ok_or_else(|| anyhow!("provider {} requires base_url", self.id))?;

        Ok(Arc::new(OpenAiProvider::new(key, base_url)))
    }
}

/// Providers by configured id.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and register every config. The first failure aborts.
    pub fn from_configs<'a>(configs: impl IntoIterator<Item = &'a ProviderConfig>) -> Result<Self> {
        let mut registry = Self::new();
        for config in configs {
            registry.register(config.id.clone(), config.build()?);
            tracing::debug!(provider = %config.id, kind = ?config.provider_type, "provider registered");
        }
        Ok(registry)
    }

    pub fn register(&mut self, id: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(id.into(), provider);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn LlmProvider>> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("provider not found: {id}"))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}

/// Offline provider: echoes the last user turn as plain text, which no
/// structured-output parser accepts.
pub struct StubProvider;

#[async_trait]
impl LlmProvider for StubProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let last = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        Ok(LlmResponse {
            text: format!("[stub:{}] {last}", request.model),
            input_tokens: None,
            output_tokens: None,
            stop_reason: Some("end_turn".into()),
        })
    }
}
