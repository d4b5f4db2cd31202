use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{LlmMessage, LlmProvider, LlmRequest, LlmResponse};

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Chat-completions client for OpenAI and API-compatible endpoints
/// (DeepSeek, Groq, OpenRouter, Ollama, self-hosted gateways).
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    api_base: String,
    endpoint: String,
    http_timeout: Duration,
}

/// How a failed call should be treated by whoever retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Throttling, overload, gateway timeouts: worth another attempt later.
    Transient,
    /// Credentials or request shape are wrong.
    Rejected,
    Other,
}

impl FailureClass {
    pub fn of_status(status: StatusCode) -> Self {
        match status.as_u16() {
            408 | 429 | 500..=599 => Self::Transient,
            400 | 401 | 403 | 404 | 422 => Self::Rejected,
            _ => Self::Other,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Rejected => "rejected",
            Self::Other => "failed",
        }
    }
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        Self {
            http: http_client(DEFAULT_HTTP_TIMEOUT),
            api_key: api_key.into(),
            endpoint: format!("{api_base}/chat/completions"),
            api_base,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let body = ChatCompletionRequest::from(request);
        tracing::debug!(endpoint = %self.endpoint, model = %body.model, "chat completion request");

        let sent = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await;
        let response = match sent {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Err(anyhow!(
                    "chat completion transient: no reply within {:?}",
                    self.http_timeout
                ));
            }
            Err(e) if e.is_connect() => {
                return Err(anyhow!("chat completion transient: cannot connect: {e}"));
            }
            Err(e) => return Err(e.into()),
        };

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            return Err(status_error(status, &raw));
        }

        let completion: ChatCompletion = response.json().await?;
        LlmResponse::try_from(completion)
    }

    /// Lists models, which every compatible server answers without spending tokens.
    async fn health(&self) -> Result<()> {
        let response = self
            .http
            .get(format!("{}/models", self.api_base))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let raw = response.text().await.unwrap_or_default();
        Err(status_error(status, &raw))
    }
}

fn status_error(status: StatusCode, raw: &str) -> anyhow::Error {
    let class = FailureClass::of_status(status);
    match serde_json::from_str::<ErrorEnvelope>(raw) {
        Ok(envelope) => anyhow!(
            "chat completion {} ({status}): {} [{}]",
            class.label(),
            envelope.error.message,
            envelope.error.kind
        ),
        Err(_) => anyhow!("chat completion {} ({status})", class.label()),
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

impl From<LlmRequest> for ChatCompletionRequest {
    fn from(request: LlmRequest) -> Self {
        let system = request.system.map(|text| WireMessage {
            role: "system".into(),
            content: text,
        });
        // Blank turns are rejected by several compatible servers.
        let turns = request
            .messages
            .into_iter()
            .filter(|m| !m.content.trim().is_empty())
            .map(|LlmMessage { role, content }| WireMessage { role, content });

        Self {
            model: request.model,
            messages: system.into_iter().chain(turns).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: request.json_output.then_some(ResponseFormat {
                kind: "json_object",
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl TryFrom<ChatCompletion> for LlmResponse {
    type Error = anyhow::Error;

    fn try_from(completion: ChatCompletion) -> Result<Self> {
        let Some(choice) = completion.choices.into_iter().next() else {
            return Err(anyhow!("chat completion returned no choices"));
        };
        let stop_reason = choice.finish_reason.map(|reason| match reason.as_str() {
            "stop" => "end_turn".to_string(),
            "length" => "max_tokens".to_string(),
            _ => reason,
        });
        Ok(LlmResponse {
            text: choice.message.content.unwrap_or_default(),
            input_tokens: completion.usage.as_ref().map(|u| u.prompt_tokens),
            output_tokens: completion.usage.as_ref().map(|u| u.completion_tokens),
            stop_reason,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default, rename = "type")]
    kind: String,
}
