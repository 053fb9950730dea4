use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::snapshot::PortfolioSnapshot;

/// Which threshold was crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreachKind {
    MinBalance,
    MaxLoss,
    MaxGain,
}

impl BreachKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreachKind::MinBalance => "MIN_BALANCE",
            BreachKind::MaxLoss => "MAX_LOSS",
            BreachKind::MaxGain => "MAX_GAIN",
        }
    }
}

impl fmt::Display for BreachKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Protective decision for a breach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Flatten every open position
    CloseAll,
    /// Leave positions open
    Hold,
}

impl Decision {
    /// Wire token used in oracle prompts and replies
    pub fn token(&self) -> &'static str {
        match self {
            Decision::CloseAll => "CLOSE_ALL",
            Decision::Hold => "HOLD_POSITIONS",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// Result of applying a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Every venue reports zero exposure
    Success {
        venues: Vec<String>,
        attempts: u32,
    },
    /// Decision was HOLD; nothing was sent to any venue
    Held,
    /// Positions remained after the bounded retries
    PartialFailure {
        remaining: Vec<String>,
        attempts: u32,
    },
}

impl ActionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionOutcome::Success { .. } => "success",
            ActionOutcome::Held => "held",
            ActionOutcome::PartialFailure { .. } => "partial_failure",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ActionOutcome::PartialFailure { .. })
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why an oracle produced no counted vote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum NonVote {
    Timeout,
    Malformed(String),
    Failed(String),
}

/// One oracle's ballot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ballot {
    Vote {
        recommendation: Decision,
        rationale: String,
    },
    Abstain(NonVote),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleVote {
    pub oracle_id: String,
    pub ballot: Ballot,
    pub latency_ms: u64,
}

impl OracleVote {
    pub fn recommendation(&self) -> Option<Decision> {
        match &self.ballot {
            Ballot::Vote { recommendation, .. } => Some(*recommendation),
            Ballot::Abstain(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub close_all: u32,
    pub hold: u32,
}

impl Tally {
    pub fn counted(&self) -> u32 {
        self.close_all + self.hold
    }

    pub fn max(&self) -> u32 {
        self.close_all.max(self.hold)
    }
}

/// Reduction of all votes into one decision; embedded in the breach event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub votes: Vec<OracleVote>,
    pub tally: Tally,
    pub decision: Decision,
    pub agreement_ratio: f64,
    /// True when the fail-safe rule, not a majority, produced the decision
    pub fail_safe: bool,
}

/// A threshold crossing detected on one tick.
///
/// Created by the detector; the controller attaches the decision and
/// outcome before the event is persisted.
#[derive(Debug, Clone, Serialize)]
pub struct BreachEvent {
    id: Uuid,
    timestamp: DateTime<Utc>,
    kind: BreachKind,
    /// The metric that crossed (balance or P&L)
    observed: Decimal,
    /// The configured limit it crossed
    limit: Decimal,
    snapshot: Arc<PortfolioSnapshot>,
    decision: Option<Decision>,
    consensus: Option<ConsensusResult>,
    outcome: Option<ActionOutcome>,
}

impl BreachEvent {
    pub fn new(
        kind: BreachKind,
        observed: Decimal,
        limit: Decimal,
        snapshot: Arc<PortfolioSnapshot>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: snapshot.timestamp(),
            kind,
            observed,
            limit,
            snapshot,
            decision: None,
            consensus: None,
            outcome: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn kind(&self) -> BreachKind {
        self.kind
    }

    pub fn observed(&self) -> Decimal {
        self.observed
    }

    pub fn limit(&self) -> Decimal {
        self.limit
    }

    pub fn snapshot(&self) -> &PortfolioSnapshot {
        &self.snapshot
    }

    pub fn decision(&self) -> Option<Decision> {
        self.decision
    }

    pub fn consensus(&self) -> Option<&ConsensusResult> {
        self.consensus.as_ref()
    }

    pub fn outcome(&self) -> Option<&ActionOutcome> {
        self.outcome.as_ref()
    }

    pub fn agreement_ratio(&self) -> Option<f64> {
        self.consensus.as_ref().map(|c| c.agreement_ratio)
    }

    pub(crate) fn attach_decision(&mut self, decision: Decision, consensus: Option<ConsensusResult>) {
        self.decision = Some(decision);
        self.consensus = consensus;
    }

    pub(crate) fn attach_outcome(&mut self, outcome: ActionOutcome) {
        self.outcome = Some(outcome);
    }

    pub fn is_complete(&self) -> bool {
        self.decision.is_some() && self.outcome.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_decision_tokens() {
        assert_eq!(Decision::CloseAll.token(), "CLOSE_ALL");
        assert_eq!(Decision::Hold.token(), "HOLD_POSITIONS");
    }

    #[test]
    fn test_event_starts_incomplete() {
        let snap = Arc::new(PortfolioSnapshot::new(Utc::now(), "paper", dec!(48), vec![]));
        let mut event = BreachEvent::new(BreachKind::MinBalance, dec!(48), dec!(50), snap.clone());
        assert_eq!(event.timestamp(), snap.timestamp());
        assert!(!event.is_complete());

        event.attach_decision(Decision::CloseAll, None);
        assert!(!event.is_complete());
        event.attach_outcome(ActionOutcome::Success {
            venues: vec![],
            attempts: 0,
        });
        assert!(event.is_complete());
        assert_eq!(event.agreement_ratio(), None);
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(ActionOutcome::Held).unwrap();
        assert_eq!(json["status"], "held");
        assert!(ActionOutcome::PartialFailure {
            remaining: vec!["paper:BTC".into()],
            attempts: 3
        }
        .is_fatal());
    }
}
