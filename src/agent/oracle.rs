use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use super::anthropic::AnthropicOracle;
use super::chat::ChatCompletionsOracle;
use super::client::ClaudeCliOracle;
use super::parse::OracleReply;
use super::protocol::ArbitrationRequest;
use crate::config::OracleConfig;
use crate::error::{GuardError, OracleError, Result};

/// Backend an oracle entry talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleKind {
    /// Anthropic Messages API
    Anthropic,
    /// OpenAI-compatible `/chat/completions` (OpenRouter, DeepSeek, xAI, ...)
    ChatCompletions,
    /// Local `claude` CLI subprocess
    ClaudeCli,
}

impl OracleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::ChatCompletions => "chat_completions",
            Self::ClaudeCli => "claude_cli",
        }
    }
}

impl std::fmt::Display for OracleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OracleKind {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "chat_completions" | "openai" | "openrouter" | "deepseek" | "xai" => {
                Ok(Self::ChatCompletions)
            }
            "claude_cli" | "cli" => Ok(Self::ClaudeCli),
            _ => Err("invalid oracle; expected anthropic|chat_completions|claude_cli"),
        }
    }
}

/// One external decision oracle.
///
/// Implementations never guess: a reply without exactly one decision token,
/// a transport failure, or a timeout is an error, not a default decision.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    fn id(&self) -> &str;

    async fn consult(&self, request: &ArbitrationRequest) -> std::result::Result<OracleReply, OracleError>;
}

fn read_api_key(config: &OracleConfig) -> Result<String> {
    let var = config.api_key_env.as_deref().ok_or_else(|| {
        GuardError::InvalidConfig(format!("oracle {} needs api_key_env", config.id))
    })?;
    std::env::var(var).map_err(|_| {
        GuardError::InvalidConfig(format!(
            "oracle {} expects its API key in ${}, which is not set",
            config.id, var
        ))
    })
}

/// Build one oracle client from its config entry
pub fn build_oracle(config: &OracleConfig) -> Result<Arc<dyn DecisionOracle>> {
    let oracle: Arc<dyn DecisionOracle> = match config.kind {
        OracleKind::Anthropic => Arc::new(AnthropicOracle::new(config, read_api_key(config)?)?),
        OracleKind::ChatCompletions => {
            Arc::new(ChatCompletionsOracle::new(config, read_api_key(config)?)?)
        }
        OracleKind::ClaudeCli => Arc::new(ClaudeCliOracle::new(config)),
    };
    info!(oracle = %config.id, kind = %config.kind, "oracle configured");
    Ok(oracle)
}

pub fn build_oracles(configs: &[OracleConfig]) -> Result<Vec<Arc<dyn DecisionOracle>>> {
    configs.iter().map(build_oracle).collect()
}

/// Ids of configured CLI oracles whose binary does not run.
///
/// A missing CLI is not fatal; its calls become non-votes at arbitration.
pub async fn unavailable_cli_oracles(configs: &[OracleConfig]) -> Vec<String> {
    let mut missing = Vec::new();
    for config in configs.iter().filter(|c| c.kind == OracleKind::ClaudeCli) {
        if !ClaudeCliOracle::new(config).check_availability().await {
            warn!(oracle = %config.id, "CLI oracle unavailable; it will not vote");
            missing.push(config.id.clone());
        }
    }
    missing
}
