//! Arbitration request sent to decision oracles
//!
//! The request is serialized into the prompt as JSON; the oracle answers in
//! free text that must carry exactly one decision token.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{BreachEvent, BreachKind, Decision, Side};

/// One open position as shown to an oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSummary {
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub unrealized_pnl: Decimal,
}

/// Portfolio summary embedded in the request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub total_value: Decimal,
    pub available_balance: Decimal,
    /// P&L since the baseline
    pub pnl: Decimal,
    pub open_positions: Vec<PositionSummary>,
}

/// Everything an oracle gets to see about a breach
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrationRequest {
    pub breach_kind: BreachKind,
    /// Metric value that crossed the limit
    pub observed: Decimal,
    pub limit: Decimal,
    pub snapshot_summary: SnapshotSummary,
    /// What happens without arbitration
    pub default_action: Decision,
}

impl ArbitrationRequest {
    pub fn from_event(event: &BreachEvent, default_action: Decision) -> Self {
        let snapshot = event.snapshot();
        Self {
            breach_kind: event.kind(),
            observed: event.observed(),
            limit: event.limit(),
            snapshot_summary: SnapshotSummary {
                total_value: snapshot.total_value_usd(),
                available_balance: snapshot.available_balance_usd(),
                pnl: snapshot.realized_pnl_since_baseline(),
                open_positions: snapshot
                    .open_positions()
                    .map(|p| PositionSummary {
                        symbol: p.symbol.clone(),
                        side: p.side,
                        size: p.size,
                        unrealized_pnl: p.unrealized_pnl,
                    })
                    .collect(),
            },
            default_action,
        }
    }

    fn headline(&self) -> String {
        match self.breach_kind {
            BreachKind::MinBalance => format!(
                "Available balance ${} is below the minimum of ${}",
                self.observed.round_dp(2),
                self.limit.round_dp(2)
            ),
            BreachKind::MaxLoss => format!(
                "Your account has lost ${}, exceeding the loss limit of ${}",
                (-self.observed).round_dp(2),
                self.limit.round_dp(2)
            ),
            BreachKind::MaxGain => format!(
                "Your account has gained ${}, reaching the take-profit limit of ${}",
                self.observed.round_dp(2),
                self.limit.round_dp(2)
            ),
        }
    }

    /// Render the user prompt
    pub fn to_prompt(&self) -> String {
        let context = serde_json::to_string_pretty(self).unwrap_or_default();

        let mut positions = String::new();
        for p in &self.snapshot_summary.open_positions {
            positions.push_str(&format!(
                "- {} {} {} (unrealized PnL: ${})\n",
                p.symbol,
                p.side,
                p.size,
                p.unrealized_pnl.round_dp(2)
            ));
        }
        if positions.is_empty() {
            positions.push_str("- none\n");
        }

        format!(
            r#"RISK LIMIT BREACH ALERT ({kind})

{headline}

Current Positions:
{positions}
Default action if you do not answer: {default}

## Context

```json
{context}
```

Should we close all positions immediately? Consider:
1. Market conditions
2. Position sizes and leverage
3. Risk of further losses

Respond with:
CLOSE_ALL or HOLD_POSITIONS
Then explain your reasoning."#,
            kind = self.breach_kind,
            headline = self.headline(),
            positions = positions,
            default = self.default_action.token(),
            context = context,
        )
    }
}

/// System prompt shared by every oracle backend
pub const ARBITRATION_SYSTEM_PROMPT: &str = "You are a risk manager for a leveraged trading account. \
A risk limit has been breached. Reply with exactly one of the tokens CLOSE_ALL or HOLD_POSITIONS \
on the first line, then a short justification. Never use both tokens.";
