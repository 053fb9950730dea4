//! Decision oracles and the consensus step that arbitrates a breach
//!
//! Each oracle receives the same [`ArbitrationRequest`] and must answer with
//! exactly one of `CLOSE_ALL` / `HOLD_POSITIONS`. Anything else is a non-vote.

pub mod anthropic;
pub mod chat;
pub mod client;
pub mod consensus;
pub mod oracle;
pub mod parse;
pub mod protocol;
pub mod scripted;

pub use anthropic::AnthropicOracle;
pub use chat::ChatCompletionsOracle;
pub use client::ClaudeCliOracle;
pub use consensus::{reduce, ConsensusAggregator, ConsensusPolicy};
pub use oracle::{build_oracle, build_oracles, unavailable_cli_oracles, DecisionOracle, OracleKind};
pub use parse::{parse_reply, OracleReply};
pub use protocol::{ArbitrationRequest, PositionSummary, SnapshotSummary, ARBITRATION_SYSTEM_PROMPT};
pub use scripted::ScriptedOracle;
