//! Anthropic Messages API oracle

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

use super::oracle::DecisionOracle;
use super::parse::{parse_reply, OracleReply};
use super::protocol::{ArbitrationRequest, ARBITRATION_SYSTEM_PROMPT};
use crate::config::OracleConfig;
use crate::error::{GuardError, OracleError, Result};

pub const DEFAULT_ANTHROPIC_API: &str = "https://api.anthropic.com/v1";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-haiku-4-5-20251001";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

pub struct AnthropicOracle {
    id: String,
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicOracle {
    pub fn new(config: &OracleConfig, api_key: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| GuardError::Internal(format!("failed to build Anthropic client: {}", e)))?;

        Ok(Self {
            id: config.id.clone(),
            http,
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(DEFAULT_ANTHROPIC_API)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn unavailable(&self, reason: impl Into<String>) -> OracleError {
        OracleError::Unavailable {
            oracle: self.id.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl DecisionOracle for AnthropicOracle {
    fn id(&self) -> &str {
        &self.id
    }

    async fn consult(&self, request: &ArbitrationRequest) -> std::result::Result<OracleReply, OracleError> {
        let started = Instant::now();
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: ARBITRATION_SYSTEM_PROMPT,
            messages: vec![Message {
                role: "user",
                content: request.to_prompt(),
            }],
        };

        let resp = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(self.unavailable(format!("status={} body={}", status, text)));
        }

        let parsed: MessagesResponse = resp.json().await.map_err(|e| OracleError::MalformedResponse {
            oracle: self.id.clone(),
            reason: format!("invalid messages payload: {}", e),
        })?;

        let text: String = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");

        debug!(
            oracle = %self.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            chars = text.len(),
            "anthropic reply received"
        );
        parse_reply(&self.id, &text)
    }
}
