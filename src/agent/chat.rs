//! OpenAI-compatible `/chat/completions` oracle (OpenRouter, DeepSeek, xAI)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::oracle::DecisionOracle;
use super::parse::{parse_reply, OracleReply};
use super::protocol::{ArbitrationRequest, ARBITRATION_SYSTEM_PROMPT};
use crate::config::OracleConfig;
use crate::error::{GuardError, OracleError, Result};

pub const DEFAULT_CHAT_API: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

pub struct ChatCompletionsOracle {
    id: String,
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl ChatCompletionsOracle {
    pub fn new(config: &OracleConfig, api_key: String) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            GuardError::InvalidConfig(format!("chat_completions oracle {} needs a model", config.id))
        })?;

        let http = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| GuardError::Internal(format!("failed to build chat client: {}", e)))?;

        Ok(Self {
            id: config.id.clone(),
            http,
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(DEFAULT_CHAT_API)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl DecisionOracle for ChatCompletionsOracle {
    fn id(&self) -> &str {
        &self.id
    }

    async fn consult(&self, request: &ArbitrationRequest) -> std::result::Result<OracleReply, OracleError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: ARBITRATION_SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.to_prompt(),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| OracleError::Unavailable {
                oracle: self.id.clone(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(OracleError::Unavailable {
                oracle: self.id.clone(),
                reason: format!("status={} body={}", status, text),
            });
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| OracleError::MalformedResponse {
            oracle: self.id.clone(),
            reason: format!("invalid completion payload: {}", e),
        })?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        debug!(oracle = %self.id, model = %self.model, chars = content.len(), "chat completion received");
        parse_reply(&self.id, &content)
    }
}
