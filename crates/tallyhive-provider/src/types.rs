use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

impl LlmMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<LlmMessage>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Ask the provider to constrain the reply to a single JSON object.
    #[serde(default)]
    pub json_output: bool,
}

fn default_max_tokens() -> u32 {
    512
}

impl LlmRequest {
    #[cfg(test)]
    pub(crate) fn simple(model: String, system: Option<String>, user: String) -> Self {
        Self {
            model,
            system,
            messages: vec![LlmMessage::user(user)],
            max_tokens: default_max_tokens(),
            temperature: None,
            json_output: false,
        }
    }

    /// Deterministic JSON extraction request: temperature 0, JSON output.
    pub fn structured(
        model: String,
        system: String,
        messages: Vec<LlmMessage>,
        max_tokens: u32,
    ) -> Self {
        Self {
            model,
            system: Some(system),
            messages,
            max_tokens,
            temperature: Some(0.0),
            json_output: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub stop_reason: Option<String>,
}
