use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{ActionOutcome, BreachEvent, BreachKind, Decision, OracleVote, PortfolioSnapshot, Position};
use crate::error::{GuardError, Result};

/// One row per breach: the event with its snapshot flattened into columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: BreachKind,
    pub observed: Decimal,
    pub limit: Decimal,
    pub venue_id: String,
    pub total_value_usd: Decimal,
    pub available_balance_usd: Decimal,
    pub baseline_value_usd: Decimal,
    pub pnl_since_baseline: Decimal,
    pub open_positions: u32,
    pub positions: Vec<Position>,
    pub decision: Decision,
    /// Absent when the decision did not go through arbitration
    pub agreement_ratio: Option<f64>,
    pub fail_safe: bool,
    pub votes: Vec<OracleVote>,
    pub outcome: ActionOutcome,
}

impl AuditRecord {
    /// Flatten a completed event; an event without decision and outcome is a bug
    pub fn from_event(event: &BreachEvent) -> Result<Self> {
        let (Some(decision), Some(outcome)) = (event.decision(), event.outcome()) else {
            return Err(GuardError::Internal(format!(
                "breach event {} persisted before it was complete",
                event.id()
            )));
        };

        let snapshot = event.snapshot();
        let consensus = event.consensus();

        Ok(Self {
            event_id: event.id(),
            timestamp: event.timestamp(),
            kind: event.kind(),
            observed: event.observed(),
            limit: event.limit(),
            venue_id: snapshot.venue_id().to_string(),
            total_value_usd: snapshot.total_value_usd(),
            available_balance_usd: snapshot.available_balance_usd(),
            baseline_value_usd: snapshot.baseline_value_usd(),
            pnl_since_baseline: snapshot.realized_pnl_since_baseline(),
            open_positions: snapshot.open_positions().count() as u32,
            positions: snapshot.positions().to_vec(),
            decision,
            agreement_ratio: event.agreement_ratio(),
            fail_safe: consensus.map(|c| c.fail_safe).unwrap_or(false),
            votes: consensus.map(|c| c.votes.clone()).unwrap_or_default(),
            outcome: outcome.clone(),
        })
    }
}

/// Breach-free snapshot kept for balance history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSample {
    pub timestamp: DateTime<Utc>,
    pub venue_id: String,
    pub total_value_usd: Decimal,
    pub available_balance_usd: Decimal,
    pub pnl_since_baseline: Decimal,
    pub open_positions: u32,
}

impl From<&PortfolioSnapshot> for BalanceSample {
    fn from(snapshot: &PortfolioSnapshot) -> Self {
        Self {
            timestamp: snapshot.timestamp(),
            venue_id: snapshot.venue_id().to_string(),
            total_value_usd: snapshot.total_value_usd(),
            available_balance_usd: snapshot.available_balance_usd(),
            pnl_since_baseline: snapshot.realized_pnl_since_baseline(),
            open_positions: snapshot.open_positions().count() as u32,
        }
    }
}
