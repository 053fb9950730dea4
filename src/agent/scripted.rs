//! Oracle with a canned reply, for tests and rehearsals

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::oracle::DecisionOracle;
use super::parse::{parse_reply, OracleReply};
use super::protocol::ArbitrationRequest;
use crate::domain::Decision;
use crate::error::OracleError;

#[derive(Debug, Clone)]
enum Script {
    Reply(String),
    Fail(String),
    Hang,
}

pub struct ScriptedOracle {
    id: String,
    script: Script,
    delay: Duration,
    calls: AtomicU32,
}

impl ScriptedOracle {
    /// Replies with `text` verbatim; it still goes through the token parser
    pub fn replying(id: &str, text: &str) -> Self {
        Self::new(id, Script::Reply(text.to_string()))
    }

    pub fn voting(id: &str, decision: Decision) -> Self {
        Self::replying(id, &format!("{}\nscripted", decision.token()))
    }

    pub fn failing(id: &str, reason: &str) -> Self {
        Self::new(id, Script::Fail(reason.to_string()))
    }

    /// Never answers
    pub fn hanging(id: &str) -> Self {
        Self::new(id, Script::Hang)
    }

    fn new(id: &str, script: Script) -> Self {
        Self {
            id: id.to_string(),
            script,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    fn id(&self) -> &str {
        &self.id
    }

    async fn consult(&self, _request: &ArbitrationRequest) -> Result<OracleReply, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.script {
            Script::Reply(text) => parse_reply(&self.id, text),
            Script::Fail(reason) => Err(OracleError::Unavailable {
                oracle: self.id.clone(),
                reason: reason.clone(),
            }),
            Script::Hang => std::future::pending().await,
        }
    }
}
