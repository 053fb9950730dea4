//! Oracle backed by the local `claude` CLI
//!
//! The prompt is written to the subprocess's stdin and the plain-text reply is
//! read from stdout. The child is killed if the consult future is dropped,
//! which is how an expired arbitration deadline cancels it.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::oracle::DecisionOracle;
use super::parse::{parse_reply, OracleReply};
use super::protocol::{ArbitrationRequest, ARBITRATION_SYSTEM_PROMPT};
use crate::config::OracleConfig;
use crate::error::OracleError;

const DEFAULT_CLI_PATH: &str = "claude";

pub struct ClaudeCliOracle {
    id: String,
    cli_path: String,
    model: Option<String>,
}

impl ClaudeCliOracle {
    pub fn new(config: &OracleConfig) -> Self {
        Self {
            id: config.id.clone(),
            cli_path: config
                .cli_path
                .clone()
                .unwrap_or_else(|| DEFAULT_CLI_PATH.to_string()),
            model: config.model.clone(),
        }
    }

    /// Check if the CLI can be executed
    pub async fn check_availability(&self) -> bool {
        match Command::new(&self.cli_path).arg("--version").output().await {
            Ok(out) if out.status.success() => {
                info!(
                    oracle = %self.id,
                    "claude CLI available: {}",
                    String::from_utf8_lossy(&out.stdout).trim()
                );
                true
            }
            Ok(_) => {
                warn!(oracle = %self.id, "claude CLI returned error status");
                false
            }
            Err(e) => {
                error!(oracle = %self.id, "claude CLI not found at '{}': {}", self.cli_path, e);
                false
            }
        }
    }

    fn failed(&self, reason: impl Into<String>) -> OracleError {
        OracleError::Unavailable {
            oracle: self.id.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl DecisionOracle for ClaudeCliOracle {
    fn id(&self) -> &str {
        &self.id
    }

    async fn consult(&self, request: &ArbitrationRequest) -> Result<OracleReply, OracleError> {
        let mut cmd = Command::new(&self.cli_path);
        cmd.arg("--print")
            .arg("--output-format")
            .arg("text")
            .arg("--system-prompt")
            .arg(ARBITRATION_SYSTEM_PROMPT)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(model) = &self.model {
            cmd.arg("--model").arg(model);
        }

        debug!(oracle = %self.id, "spawning claude process");
        let mut child = cmd
            .spawn()
            .map_err(|e| self.failed(format!("failed to spawn {}: {}", self.cli_path, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.to_prompt().as_bytes())
                .await
                .map_err(|e| self.failed(format!("failed to write prompt: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| self.failed(format!("failed to read output: {}", e)))?;

        if !output.status.success() {
            return Err(self.failed(format!(
                "claude exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        parse_reply(&self.id, &text)
    }
}
