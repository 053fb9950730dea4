use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::warn;

use crate::config::{LimitMode, ThresholdConfig};
use crate::domain::{BreachEvent, BreachKind, PortfolioSnapshot};

const HUNDRED: Decimal = Decimal::from_parts(100, 0, 0, false, 0);

/// Effective USD loss and gain limits for a snapshot.
///
/// In percent mode they scale with the baseline; `None` means the P&L rules
/// cannot be applied (no positive baseline to take a percentage of).
pub fn pnl_limits(snapshot: &PortfolioSnapshot, config: &ThresholdConfig) -> Option<(Decimal, Decimal)> {
    match config.limit_mode {
        LimitMode::Usd => Some((config.max_loss_usd, config.max_gain_usd)),
        LimitMode::Percent => {
            let baseline = snapshot.baseline_value_usd();
            if baseline <= Decimal::ZERO {
                return None;
            }
            Some((
                baseline * config.max_loss_percent / HUNDRED,
                baseline * config.max_gain_percent / HUNDRED,
            ))
        }
    }
}

/// Check one snapshot against the thresholds.
///
/// Rules in precedence order, first match wins:
/// 1. available balance below `min_balance_usd`
/// 2. P&L since baseline at or below the negative loss limit
/// 3. P&L since baseline at or above the gain limit
pub fn evaluate(snapshot: &Arc<PortfolioSnapshot>, config: &ThresholdConfig) -> Option<BreachEvent> {
    let available = snapshot.available_balance_usd();
    if available < config.min_balance_usd {
        return Some(BreachEvent::new(
            BreachKind::MinBalance,
            available,
            config.min_balance_usd,
            Arc::clone(snapshot),
        ));
    }

    let Some((max_loss, max_gain)) = pnl_limits(snapshot, config) else {
        warn!(
            baseline = %snapshot.baseline_value_usd(),
            "percent limits skipped, baseline is not positive"
        );
        return None;
    };

    let pnl = snapshot.realized_pnl_since_baseline();
    if pnl <= -max_loss {
        return Some(BreachEvent::new(
            BreachKind::MaxLoss,
            pnl,
            max_loss,
            Arc::clone(snapshot),
        ));
    }

    if pnl >= max_gain {
        return Some(BreachEvent::new(
            BreachKind::MaxGain,
            pnl,
            max_gain,
            Arc::clone(snapshot),
        ));
    }

    None
}
